use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::position::Position;

/// Checkpoint ids increase monotonically along the recording.
pub type CheckpointId = u32;

/// Sentinel for "no checkpoint". Used by a freshly launched child's
/// primordial pause and by bookkeeping before the first checkpoint.
pub const INVALID_CHECKPOINT: CheckpointId = 0;

/// The checkpoint taken when the recording starts. Every replaying child
/// saves it unconditionally so there is always somewhere to rewind to.
pub const FIRST_CHECKPOINT: CheckpointId = 1;

/// Counter of observable events since the start of the recording. Distinct
/// observable events always have distinct progress values, so progress
/// totally orders events within a deterministic recording.
pub type Progress = u64;

/// A point in the recording's execution: the last checkpoint reached, the
/// progress counter, and (unless the point is exactly at the checkpoint)
/// the position of the observable event at that progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionPoint {
    pub checkpoint: CheckpointId,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl ExecutionPoint {
    /// The point exactly at a checkpoint, before any further event.
    pub fn at_checkpoint(checkpoint: CheckpointId) -> Self {
        ExecutionPoint {
            checkpoint,
            progress: 0,
            position: None,
        }
    }

    pub fn new(checkpoint: CheckpointId, progress: Progress, position: Position) -> Self {
        ExecutionPoint {
            checkpoint,
            progress,
            position: Some(position),
        }
    }

    pub fn is_checkpoint(&self) -> bool {
        self.position.is_none()
    }
}

impl PartialOrd for ExecutionPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExecutionPoint {
    /// Points are ordered by checkpoint, then progress. A bare checkpoint
    /// point precedes any event point within its span.
    fn cmp(&self, other: &Self) -> Ordering {
        (self.checkpoint, self.progress, self.position.is_some()).cmp(&(
            other.checkpoint,
            other.progress,
            other.position.is_some(),
        ))
    }
}

impl fmt::Display for ExecutionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            None => write!(f, "#{}", self.checkpoint),
            Some(pos) => write!(
                f,
                "#{}+{} {}",
                self.checkpoint,
                self.progress,
                pos.kind_str()
            ),
        }
    }
}
