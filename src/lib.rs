pub mod bridge;
pub mod config;
pub mod middleman;
pub mod protocol;
pub mod replay;
pub mod sim;
pub mod tape;

pub use bridge::{BridgeError, DebuggerRequest};
pub use config::Config;
pub use middleman::{ChildRole, NavigationController, SessionError, SessionEvent, Spawner};
pub use protocol::{
    BreakpointId, Channel, ChannelError, CheckpointId, ExecutionPoint, Message, Position,
    Progress, ScriptId, FIRST_CHECKPOINT, INVALID_CHECKPOINT,
};
pub use tape::{Tape, TapeEntry, TapeError, TapeWriter};
