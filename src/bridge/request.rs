use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::protocol::ScriptId;

/// Debugger requests handled by a paused child. The wire form is JSON
/// with a camelCase `kind` tag, e.g. `{"kind":"getFrame","index":-1}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DebuggerRequest {
    /// Ids of every script known at the current point of execution.
    FindScripts,
    GetScript {
        script: ScriptId,
    },
    /// The script whose creation the current pause is at, if any.
    GetNewScript,
    GetSource {
        script: ScriptId,
    },
    GetObject {
        object: u32,
    },
    GetObjectProperties {
        object: u32,
    },
    GetEnvironmentNames {
        environment: u32,
    },
    /// `index` counts from the oldest frame; -1 names the newest.
    GetFrame {
        index: i64,
    },
    FrameEvaluate {
        index: u32,
        text: String,
    },
    PopFrameResult,
}

/// The error form of a response. Exceptions complete the request cycle
/// normally; the channel protocol never sees them as failures.
pub fn exception(message: impl AsRef<str>) -> serde_json::Value {
    json!({ "exception": message.as_ref() })
}
