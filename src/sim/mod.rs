//! In-process simulation of a recorded program.
//!
//! The simulator runs scripted children inside the current process: a
//! `ScriptedEngine` executes a scenario (recording) or the shared tape
//! (replaying), and `SimSpawner` hosts full child loops on threads behind
//! real channels. The demo binary and the integration tests drive the
//! middleman against it exactly as an embedding would drive it against
//! real processes.

mod engine;
mod scenario;
mod spawner;

pub use engine::{ScriptedEngine, SimObject};
pub use scenario::Scenario;
pub use spawner::{SimChildHandle, SimFault, SimSpawner};

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::tape::{TapeEntry, TapeError, TapeHeader, TapeWriter};

/// The recording tape shared between the simulated recording child and
/// every replaying child. Replaying readers only see entries up to the
/// last flush.
#[derive(Clone)]
pub struct SharedTape {
    inner: Arc<Mutex<TapeInner>>,
}

struct TapeInner {
    header: TapeHeader,
    entries: Vec<TapeEntry>,
    flushed: usize,
    writer: Option<TapeWriter>,
    persisted: usize,
}

impl SharedTape {
    pub fn new() -> Self {
        SharedTape {
            inner: Arc::new(Mutex::new(TapeInner {
                header: TapeHeader::new(),
                entries: Vec::new(),
                flushed: 0,
                writer: None,
                persisted: 0,
            })),
        }
    }

    /// Back the tape with a file so the session leaves an inspectable
    /// recording behind.
    pub fn with_file(path: &Path) -> Result<Self, TapeError> {
        let header = TapeHeader::new();
        let writer = TapeWriter::create(path, &header)?;
        Ok(SharedTape {
            inner: Arc::new(Mutex::new(TapeInner {
                header,
                entries: Vec::new(),
                flushed: 0,
                writer: Some(writer),
                persisted: 0,
            })),
        })
    }

    pub fn tape_id(&self) -> uuid::Uuid {
        self.inner.lock().header.tape_id
    }

    pub fn append(&self, entry: TapeEntry) {
        self.inner.lock().entries.push(entry);
    }

    /// Make everything appended so far visible to replaying readers, and
    /// persist it when a file backs the tape. False means persistence
    /// failed.
    pub fn flush(&self) -> bool {
        let mut inner = self.inner.lock();
        let TapeInner {
            entries,
            flushed,
            writer,
            persisted,
            ..
        } = &mut *inner;
        *flushed = entries.len();
        if let Some(writer) = writer {
            for entry in &entries[*persisted..*flushed] {
                if writer.append(entry).is_err() {
                    return false;
                }
            }
            *persisted = *flushed;
            if writer.flush().is_err() {
                return false;
            }
        }
        true
    }

    pub fn flushed_len(&self) -> usize {
        self.inner.lock().flushed
    }

    /// A flushed entry by index; entries past the flush point are not
    /// visible.
    pub fn get(&self, index: usize) -> Option<TapeEntry> {
        let inner = self.inner.lock();
        if index < inner.flushed {
            inner.entries.get(index).cloned()
        } else {
            None
        }
    }
}

impl Default for SharedTape {
    fn default() -> Self {
        Self::new()
    }
}
