use crate::protocol::{Channel, ChannelEvent};
use crate::replay::ChildKind;

use super::SessionError;

/// Handler the controller supplies for a new child's channel; the spawner
/// must wire it into the middleman end of the channel it creates.
pub type ChannelHandler = Box<dyn FnMut(ChannelEvent) + Send + 'static>;

/// Control over a launched child beyond its channel.
pub trait ChildHandle: Send {
    /// Forcibly stop the child. Idempotent; the channel disconnect this
    /// causes is how the controller observes the death.
    fn kill(&mut self);
    fn pid(&self) -> u32;
}

pub struct SpawnedChild {
    pub channel: Channel,
    pub handle: Box<dyn ChildHandle>,
}

/// Seam between the controller and whatever hosts child processes:
/// OS processes in a real embedding, in-process simulated children in
/// tests and the demo.
pub trait Spawner: Send {
    fn spawn(
        &mut self,
        kind: ChildKind,
        channel_id: u64,
        handler: ChannelHandler,
    ) -> Result<SpawnedChild, SessionError>;
}
