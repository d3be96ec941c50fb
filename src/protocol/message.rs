use serde::{Deserialize, Serialize};

use super::point::CheckpointId;
use super::position::Position;
use super::BreakpointId;

/// Messages exchanged between the middleman and a child process.
///
/// The first group travels middleman-to-child, the second child-to-
/// middleman. Bodies are JSON; the frame header carries the kind tag and
/// total size so a receiver can validate framing before decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    // Middleman to child.
    Introduction {
        parent_pid: u32,
        /// Configuration blob the child applies before anything else runs.
        prefs: serde_json::Value,
        argv: Vec<String>,
    },
    FlushRecording,
    CreateCheckpoint,
    DebuggerRequest {
        json: String,
    },
    SetBreakpoint {
        id: BreakpointId,
        /// `None` clears the breakpoint and frees the id.
        position: Option<Position>,
    },
    Resume {
        forward: bool,
    },
    RestoreCheckpoint {
        checkpoint: CheckpointId,
    },
    SetIsActive {
        active: bool,
    },
    SetAllowIntentionalCrashes {
        allow: bool,
    },
    SetSaveCheckpoint {
        checkpoint: CheckpointId,
        save: bool,
    },
    Terminate,

    // Child to middleman.
    RecordingFlushed,
    FatalError {
        message: String,
    },
    Paint {
        width: u32,
        height: u32,
        #[serde(with = "serde_bytes_base64")]
        pixels: Vec<u8>,
    },
    HitCheckpoint {
        checkpoint: CheckpointId,
        /// Non-idle execution time spent reaching this checkpoint, in
        /// microseconds.
        duration_us: u64,
    },
    HitBreakpoint {
        breakpoints: Vec<BreakpointId>,
    },
    HitRecordingEndpoint,
    DebuggerResponse {
        json: String,
    },
}

/// Numeric kind tags carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageKind {
    Introduction = 1,
    FlushRecording = 2,
    CreateCheckpoint = 3,
    DebuggerRequest = 4,
    SetBreakpoint = 5,
    Resume = 6,
    RestoreCheckpoint = 7,
    SetIsActive = 8,
    SetAllowIntentionalCrashes = 9,
    SetSaveCheckpoint = 10,
    Terminate = 11,
    RecordingFlushed = 32,
    FatalError = 33,
    Paint = 34,
    HitCheckpoint = 35,
    HitBreakpoint = 36,
    HitRecordingEndpoint = 37,
    DebuggerResponse = 38,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Introduction { .. } => MessageKind::Introduction,
            Message::FlushRecording => MessageKind::FlushRecording,
            Message::CreateCheckpoint => MessageKind::CreateCheckpoint,
            Message::DebuggerRequest { .. } => MessageKind::DebuggerRequest,
            Message::SetBreakpoint { .. } => MessageKind::SetBreakpoint,
            Message::Resume { .. } => MessageKind::Resume,
            Message::RestoreCheckpoint { .. } => MessageKind::RestoreCheckpoint,
            Message::SetIsActive { .. } => MessageKind::SetIsActive,
            Message::SetAllowIntentionalCrashes { .. } => MessageKind::SetAllowIntentionalCrashes,
            Message::SetSaveCheckpoint { .. } => MessageKind::SetSaveCheckpoint,
            Message::Terminate => MessageKind::Terminate,
            Message::RecordingFlushed => MessageKind::RecordingFlushed,
            Message::FatalError { .. } => MessageKind::FatalError,
            Message::Paint { .. } => MessageKind::Paint,
            Message::HitCheckpoint { .. } => MessageKind::HitCheckpoint,
            Message::HitBreakpoint { .. } => MessageKind::HitBreakpoint,
            Message::HitRecordingEndpoint => MessageKind::HitRecordingEndpoint,
            Message::DebuggerResponse { .. } => MessageKind::DebuggerResponse,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Message::Introduction { .. } => "Introduction",
            Message::FlushRecording => "FlushRecording",
            Message::CreateCheckpoint => "CreateCheckpoint",
            Message::DebuggerRequest { .. } => "DebuggerRequest",
            Message::SetBreakpoint { .. } => "SetBreakpoint",
            Message::Resume { .. } => "Resume",
            Message::RestoreCheckpoint { .. } => "RestoreCheckpoint",
            Message::SetIsActive { .. } => "SetIsActive",
            Message::SetAllowIntentionalCrashes { .. } => "SetAllowIntentionalCrashes",
            Message::SetSaveCheckpoint { .. } => "SetSaveCheckpoint",
            Message::Terminate => "Terminate",
            Message::RecordingFlushed => "RecordingFlushed",
            Message::FatalError { .. } => "FatalError",
            Message::Paint { .. } => "Paint",
            Message::HitCheckpoint { .. } => "HitCheckpoint",
            Message::HitBreakpoint { .. } => "HitBreakpoint",
            Message::HitRecordingEndpoint => "HitRecordingEndpoint",
            Message::DebuggerResponse { .. } => "DebuggerResponse",
        }
    }

    /// Messages the middleman may send while the child is not paused.
    pub fn can_send_while_unpaused(&self) -> bool {
        matches!(self, Message::CreateCheckpoint | Message::Terminate)
    }

    /// Messages that change what the child will do when it next executes.
    /// These are the messages recorded per child for crash recovery.
    pub fn affects_behavior(&self) -> bool {
        matches!(
            self,
            Message::Resume { .. }
                | Message::RestoreCheckpoint { .. }
                | Message::DebuggerRequest { .. }
                | Message::SetBreakpoint { .. }
        )
    }
}

/// Base64 body encoding for pixel buffers so Paint frames stay valid JSON
/// without ballooning into per-byte arrays.
mod serde_bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(de)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
