use crate::protocol::{CheckpointId, Position, Progress, ScriptId};

/// Address of a restorable snapshot. `temporary == 0` names the normal
/// checkpoint itself; higher values name the stack of temporary
/// checkpoints taken since it. Restoring or passing a normal checkpoint
/// invalidates every temporary above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckpointHandle {
    pub normal: CheckpointId,
    pub temporary: u32,
}

impl CheckpointHandle {
    pub fn normal(id: CheckpointId) -> Self {
        CheckpointHandle {
            normal: id,
            temporary: 0,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary != 0
    }
}

/// What the engine reports each time execution advances to something
/// observable. Checkpoints, new scripts, and the recording endpoint are
/// always reported; position events only when a matching watch is
/// installed.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Checkpoint {
        id: CheckpointId,
        duration_us: u64,
    },
    Position {
        position: Position,
        progress: Progress,
    },
    NewScript {
        script: ScriptId,
        progress: Progress,
    },
    /// Replay has consumed every flushed entry. Running again without new
    /// data reports this again.
    RecordingEndpoint {
        progress: Progress,
    },
}

/// Engine-level execution watches. At most one watch exists per distinct
/// site; `WatchManager` owns the dedupe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Watch {
    /// A (script, bytecode offset) site. Fires for every frame executing it.
    Site { script: ScriptId, offset: u32 },
    /// Any frame being pushed.
    EnterFrame,
    /// A frame of the given script (or any script) finishing.
    FramePop { script: Option<ScriptId> },
}

/// The deterministic execution substrate the navigation machine drives.
///
/// Implementations replay a recording: running forward is deterministic,
/// and saved checkpoints (normal or temporary) can be restored to move
/// backward. Watches select which position events `run_to_next_event`
/// surfaces.
pub trait ExecutionEngine {
    /// Advance execution to the next reportable event.
    fn run_to_next_event(&mut self) -> EngineEvent;

    /// Direct whether a future checkpoint's state is kept when reached.
    /// Only checkpoints ahead of the current one may be named.
    fn set_save_checkpoint(&mut self, checkpoint: CheckpointId, save: bool);

    /// Whether the state for a normal checkpoint is currently held.
    fn has_saved(&self, checkpoint: CheckpointId) -> bool;

    /// Snapshot the current point as a temporary checkpoint and return its
    /// handle (same normal checkpoint, next temporary index).
    fn save_temporary(&mut self) -> CheckpointHandle;

    /// Rewind to a held snapshot. Temporaries above the target are
    /// discarded.
    fn restore(&mut self, handle: CheckpointHandle);

    fn install_watch(&mut self, watch: Watch);
    fn clear_watches(&mut self);

    /// Ask the recording process to mark a checkpoint at the next
    /// opportunity. No-op while replaying.
    fn request_checkpoint(&mut self);

    /// Persist the recording (recording side) or refresh the view of what
    /// has been persisted (replaying side). False means the flush failed.
    fn flush_recording(&mut self) -> bool;

    fn script_exists(&self, script: ScriptId) -> bool;
    fn entry_offset(&self, script: ScriptId) -> Option<u32>;

    /// The last normal checkpoint reached.
    fn last_checkpoint(&self) -> CheckpointId;

    fn progress(&self) -> Progress;
}
