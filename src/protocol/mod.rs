//! Wire-level types shared by the middleman and its children: breakpoint
//! positions, execution points, the typed message set, and the framed
//! channel they travel over.

mod channel;
mod message;
mod point;
mod position;

pub use channel::{Channel, ChannelError, ChannelEvent};
pub use message::{Message, MessageKind};
pub use point::{CheckpointId, ExecutionPoint, Progress, FIRST_CHECKPOINT, INVALID_CHECKPOINT};
pub use position::{Position, ScriptId};

/// Identifier for a breakpoint set by the debugger. Ids are small, dense,
/// and reusable: clearing a breakpoint frees its id for the next set.
pub type BreakpointId = u32;
