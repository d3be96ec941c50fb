//! The debugger JSON bridge: request/response kinds, the value encoding,
//! the replay-side server that executes requests against a paused
//! debuggee, and the middleman-side proxy object model.

mod proxy;
mod request;
mod server;
mod value;

pub use proxy::{DebuggerProxy, FrameProxy, ObjectProxy, RequestTransport};
pub use request::{exception, DebuggerRequest};
pub use server::{Debuggee, DebuggeeFault, FrameInfo, ProcessOutcome, RawValue, ReplayServer, ScriptInfo};
pub use value::{JsValue, SpecialValue};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("malformed bridge payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("stale handle: the pause it belongs to has ended")]
    StaleHandle,
    #[error("bad frame index {0}")]
    BadFrameIndex(i64),
    #[error("debuggee exception: {0}")]
    Exception(String),
    #[error("transport: {0}")]
    Transport(String),
}
