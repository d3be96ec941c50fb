//! The middleman: owns the recording child and up to two replaying
//! children, assigns roles, schedules checkpoint saving, recovers crashed
//! or hung children, and exposes navigation operations to the debugger.

mod child;
mod control;
mod pending;
mod spawn;

pub use child::{ChildId, ChildProcess, ChildRole, Snapshot};
pub use control::{NavigationController, SessionEvent};
pub use pending::PendingMessages;
pub use spawn::{ChannelHandler, ChildHandle, SpawnedChild, Spawner};

use crate::protocol::ChannelError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("recording process lost: {0}")]
    RecordingChildLost(String),
    #[error("child {child} exhausted its restart limit")]
    RestartsExhausted { child: usize },
    #[error("bridge: {0}")]
    Bridge(#[from] crate::bridge::BridgeError),
}
