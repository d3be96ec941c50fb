//! On-disk recording tape.
//!
//! A tape is a JSONL file: one header line identifying the recording,
//! then one line per entry describing deterministic execution in order.
//! The recording process appends entries as it runs and persists them when
//! told to flush; replaying processes consume entries up to the flushed
//! endpoint and never beyond it.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{CheckpointId, Position, Progress, ScriptId};

pub const TAPE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum TapeError {
    #[error("tape io: {0}")]
    Io(#[from] std::io::Error),
    #[error("tape parse (line {line}): {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("tape encode: {0}")]
    Encode(serde_json::Error),
    #[error("tape is empty or missing its header line")]
    MissingHeader,
    #[error("unsupported tape schema version {0}")]
    UnsupportedSchema(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeHeader {
    pub schema_version: u32,
    pub tape_id: Uuid,
    pub created_at_ms: u64,
}

impl TapeHeader {
    pub fn new() -> Self {
        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        TapeHeader {
            schema_version: TAPE_SCHEMA_VERSION,
            tape_id: Uuid::new_v4(),
            created_at_ms,
        }
    }
}

impl Default for TapeHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// One recorded event. Entries appear in execution order; progress values
/// are strictly increasing across `Step` and `Script` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TapeEntry {
    /// A script became known to the engine at this point of execution.
    Script {
        id: ScriptId,
        url: String,
        entry_offset: u32,
        source: String,
        progress: Progress,
    },
    /// An observable position event.
    Step {
        progress: Progress,
        position: Position,
    },
    /// A checkpoint boundary, with the non-idle execution time spent since
    /// the previous one.
    Checkpoint {
        id: CheckpointId,
        progress: Progress,
        duration_us: u64,
    },
}

impl TapeEntry {
    pub fn progress(&self) -> Progress {
        match self {
            TapeEntry::Script { progress, .. }
            | TapeEntry::Step { progress, .. }
            | TapeEntry::Checkpoint { progress, .. } => *progress,
        }
    }
}

/// An in-memory tape: header plus entries.
#[derive(Debug, Clone)]
pub struct Tape {
    pub header: TapeHeader,
    pub entries: Vec<TapeEntry>,
}

impl Tape {
    pub fn new() -> Self {
        Tape {
            header: TapeHeader::new(),
            entries: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Tape, TapeError> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let header_line = lines.next().ok_or(TapeError::MissingHeader)??;
        let header: TapeHeader = serde_json::from_str(&header_line)
            .map_err(|source| TapeError::Parse { line: 1, source })?;
        if header.schema_version != TAPE_SCHEMA_VERSION {
            return Err(TapeError::UnsupportedSchema(header.schema_version));
        }

        let mut entries = Vec::new();
        for (idx, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TapeEntry = serde_json::from_str(&line).map_err(|source| {
                TapeError::Parse {
                    line: idx + 2,
                    source,
                }
            })?;
            entries.push(entry);
        }
        Ok(Tape { header, entries })
    }

    /// The number of checkpoints on the tape.
    pub fn checkpoint_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, TapeEntry::Checkpoint { .. }))
            .count()
    }

    pub fn last_progress(&self) -> Progress {
        self.entries.last().map(TapeEntry::progress).unwrap_or(0)
    }
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends tape entries to a file. Writes are buffered; `flush` is the
/// durability point and a flush failure is fatal to the recording.
pub struct TapeWriter {
    writer: BufWriter<File>,
    entries_written: usize,
}

impl TapeWriter {
    pub fn create(path: &Path, header: &TapeHeader) -> Result<TapeWriter, TapeError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        let line = serde_json::to_string(header).map_err(TapeError::Encode)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(TapeWriter {
            writer,
            entries_written: 0,
        })
    }

    pub fn append(&mut self, entry: &TapeEntry) -> Result<(), TapeError> {
        let line = serde_json::to_string(entry).map_err(TapeError::Encode)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.entries_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TapeError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    pub fn entries_written(&self) -> usize {
        self.entries_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<TapeEntry> {
        vec![
            TapeEntry::Checkpoint {
                id: 1,
                progress: 0,
                duration_us: 0,
            },
            TapeEntry::Script {
                id: 1,
                url: "app.js".into(),
                entry_offset: 0,
                source: "function main() {}".into(),
                progress: 1,
            },
            TapeEntry::Step {
                progress: 2,
                position: Position::EnterFrame,
            },
            TapeEntry::Checkpoint {
                id: 2,
                progress: 3,
                duration_us: 950_000,
            },
        ]
    }

    #[test]
    fn write_then_load_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.tape");
        let header = TapeHeader::new();

        let mut writer = TapeWriter::create(&path, &header).unwrap();
        for entry in sample_entries() {
            writer.append(&entry).unwrap();
        }
        writer.flush().unwrap();

        let tape = Tape::load(&path).unwrap();
        assert_eq!(tape.header.tape_id, header.tape_id);
        assert_eq!(tape.entries, sample_entries());
        assert_eq!(tape.checkpoint_count(), 2);
        assert_eq!(tape.last_progress(), 3);
    }

    #[test]
    fn missing_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.tape");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(Tape::load(&path), Err(TapeError::MissingHeader)));
    }

    #[test]
    fn unknown_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.tape");
        std::fs::write(
            &path,
            format!(
                "{}\n",
                serde_json::json!({
                    "schema_version": 99,
                    "tape_id": Uuid::new_v4(),
                    "created_at_ms": 0,
                })
            ),
        )
        .unwrap();
        assert!(matches!(
            Tape::load(&path),
            Err(TapeError::UnsupportedSchema(99))
        ));
    }
}
