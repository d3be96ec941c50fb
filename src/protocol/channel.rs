use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::message::Message;

/// A message frame may not exceed this size. Catches corrupt headers
/// before they turn into huge allocations.
const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;
const HEADER_SIZE: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel io: {0}")]
    Io(#[from] std::io::Error),
    #[error("channel decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("bad frame: {0}")]
    BadFrame(String),
    #[error("channel disconnected")]
    Disconnected,
}

/// What the receive thread hands to the channel's handler.
#[derive(Debug)]
pub enum ChannelEvent {
    Message(Message),
    /// The peer closed the stream or framing broke. Terminal; the receive
    /// thread exits after delivering it.
    Disconnected,
}

/// One endpoint of an ordered, reliable, length-framed message channel.
///
/// Each frame is an 8-byte header (kind tag and total size, little endian)
/// followed by the JSON body. A dedicated thread reads incoming frames and
/// feeds them to the handler supplied at construction; sends go through
/// `send` on any thread holding the channel.
pub struct Channel {
    id: u64,
    writer: Mutex<UnixStream>,
    reader: Option<JoinHandle<()>>,
}

impl Channel {
    pub fn new<F>(id: u64, stream: UnixStream, mut handler: F) -> Result<Channel, ChannelError>
    where
        F: FnMut(ChannelEvent) + Send + 'static,
    {
        let mut read_half = stream.try_clone()?;
        let reader = thread::Builder::new()
            .name(format!("channel-recv-{id}"))
            .spawn(move || loop {
                match read_frame(&mut read_half) {
                    Ok(msg) => {
                        trace!(channel = id, kind = msg.kind_str(), "recv");
                        handler(ChannelEvent::Message(msg));
                    }
                    Err(err) => {
                        debug!(channel = id, %err, "channel closed");
                        handler(ChannelEvent::Disconnected);
                        return;
                    }
                }
            })?;
        Ok(Channel {
            id,
            writer: Mutex::new(stream),
            reader: Some(reader),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn send(&self, msg: &Message) -> Result<(), ChannelError> {
        let body = serde_json::to_vec(msg)?;
        let total = HEADER_SIZE
            .checked_add(u32::try_from(body.len()).map_err(|_| {
                ChannelError::BadFrame(format!("oversized body: {} bytes", body.len()))
            })?)
            .filter(|total| *total <= MAX_FRAME_SIZE)
            .ok_or_else(|| ChannelError::BadFrame(format!("oversized body: {} bytes", body.len())))?;
        let mut header = [0u8; HEADER_SIZE as usize];
        header[..4].copy_from_slice(&(msg.kind() as u32).to_le_bytes());
        header[4..].copy_from_slice(&total.to_le_bytes());

        trace!(channel = self.id, kind = msg.kind_str(), "send");
        let mut writer = self.writer.lock();
        writer.write_all(&header)?;
        writer.write_all(&body)?;
        Ok(())
    }

    /// Closes the stream, which unblocks and terminates the receive thread
    /// on both ends.
    pub fn shutdown(&self) {
        let _ = self.writer.lock().shutdown(Shutdown::Both);
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn read_frame(stream: &mut UnixStream) -> Result<Message, ChannelError> {
    let mut header = [0u8; HEADER_SIZE as usize];
    stream.read_exact(&mut header)?;
    let kind = u32::from_le_bytes(header[..4].try_into().unwrap());
    let total = u32::from_le_bytes(header[4..].try_into().unwrap());
    if total < HEADER_SIZE || total > MAX_FRAME_SIZE {
        return Err(ChannelError::BadFrame(format!("bad total_size {total}")));
    }
    let mut body = vec![0u8; (total - HEADER_SIZE) as usize];
    stream.read_exact(&mut body)?;
    let msg: Message = serde_json::from_slice(&body)?;
    if msg.kind() as u32 != kind {
        return Err(ChannelError::BadFrame(format!(
            "header kind {kind} does not match body {}",
            msg.kind_str()
        )));
    }
    Ok(msg)
}
