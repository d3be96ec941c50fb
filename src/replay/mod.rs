//! Replay-side machinery: the execution engine seam, breakpoint watch
//! bookkeeping, the navigation phase machine, and the child process loop
//! that wires them to a channel and the debugger bridge.

mod breakpoints;
mod child;
mod engine;
mod navigation;

pub use breakpoints::WatchManager;
pub use child::{ChildExit, ChildKind, ChildOptions, ReplayChild};
pub use engine::{CheckpointHandle, EngineEvent, ExecutionEngine, Watch};
pub use navigation::{LoggedRequest, Navigation, NavigationSettings};
