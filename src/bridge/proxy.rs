use serde_json::Value;
use tracing::trace;

use crate::protocol::ScriptId;

use super::request::DebuggerRequest;
use super::value::JsValue;
use super::BridgeError;

/// Something that can carry a request to the paused child and bring the
/// response back. The middleman's controller implements this.
pub trait RequestTransport {
    fn request(&mut self, json: &str) -> Result<String, BridgeError>;
}

/// An object or environment handle held on the middleman side. Only valid
/// for the pause generation it was vended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectProxy {
    id: u32,
    generation: u64,
}

/// A stack frame handle. Like objects it is pause-scoped, and its index
/// is additionally checked against the stack depth seen when it was
/// fetched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameProxy {
    pub index: usize,
    pub script: ScriptId,
    pub offset: u32,
    pub callee: Option<ObjectProxy>,
    generation: u64,
    depth: usize,
}

/// Middleman-side view of the paused child's objects.
///
/// Handles carry the generation they were vended in, so any use of a
/// stale handle fails explicitly instead of touching recycled child ids.
/// The embedder that owns the proxy must call [`invalidate`] before any
/// operation that moves execution (a resume in either direction, a pause
/// handed to another child); the controller never sees the proxy and
/// cannot do this on the embedder's behalf. Handles fetched earlier stay
/// copyable but every use after `invalidate` returns
/// [`BridgeError::StaleHandle`].
///
/// [`invalidate`]: DebuggerProxy::invalidate
pub struct DebuggerProxy {
    generation: u64,
}

impl DebuggerProxy {
    pub fn new() -> Self {
        DebuggerProxy { generation: 0 }
    }

    /// Invalidate every handle vended so far. Call on every resume,
    /// rewind, or child switch.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        trace!(generation = self.generation, "proxy handles invalidated");
    }

    pub fn find_scripts(
        &mut self,
        transport: &mut dyn RequestTransport,
    ) -> Result<Vec<ScriptId>, BridgeError> {
        let resp = self.roundtrip(transport, &DebuggerRequest::FindScripts)?;
        Ok(serde_json::from_value(resp["scripts"].clone())?)
    }

    pub fn get_source(
        &mut self,
        transport: &mut dyn RequestTransport,
        script: ScriptId,
    ) -> Result<String, BridgeError> {
        let resp = self.roundtrip(transport, &DebuggerRequest::GetSource { script })?;
        Ok(serde_json::from_value(resp["source"].clone())?)
    }

    /// Fetch a frame; `index` -1 names the newest. `Ok(None)` means the
    /// stack is shallower than asked.
    pub fn get_frame(
        &mut self,
        transport: &mut dyn RequestTransport,
        index: i64,
    ) -> Result<Option<FrameProxy>, BridgeError> {
        let resp = self.roundtrip(transport, &DebuggerRequest::GetFrame { index })?;
        let depth = resp["depth"].as_u64().unwrap_or(0) as usize;
        let frame = &resp["frame"];
        if frame.is_null() {
            return Ok(None);
        }
        let callee: JsValue = serde_json::from_value(frame["callee"].clone())?;
        Ok(Some(FrameProxy {
            index: frame["index"].as_u64().unwrap_or(0) as usize,
            script: frame["script"].as_u64().unwrap_or(0) as ScriptId,
            offset: frame["offset"].as_u64().unwrap_or(0) as u32,
            callee: callee.object_id().map(|id| self.vend(id)),
            generation: self.generation,
            depth,
        }))
    }

    pub fn object_class(
        &mut self,
        transport: &mut dyn RequestTransport,
        object: &ObjectProxy,
    ) -> Result<String, BridgeError> {
        let id = self.check(object)?;
        let resp = self.roundtrip(transport, &DebuggerRequest::GetObject { object: id })?;
        Ok(serde_json::from_value(resp["class"].clone())?)
    }

    pub fn object_properties(
        &mut self,
        transport: &mut dyn RequestTransport,
        object: &ObjectProxy,
    ) -> Result<Vec<(String, JsValue)>, BridgeError> {
        let id = self.check(object)?;
        let resp =
            self.roundtrip(transport, &DebuggerRequest::GetObjectProperties { object: id })?;
        let props = resp["properties"].as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(props.len());
        for prop in props {
            let name = prop["name"].as_str().unwrap_or_default().to_string();
            let value: JsValue = serde_json::from_value(prop["value"].clone())?;
            out.push((name, value));
        }
        Ok(out)
    }

    pub fn evaluate(
        &mut self,
        transport: &mut dyn RequestTransport,
        frame: &FrameProxy,
        text: &str,
    ) -> Result<JsValue, BridgeError> {
        if frame.generation != self.generation {
            return Err(BridgeError::StaleHandle);
        }
        if frame.index >= frame.depth {
            return Err(BridgeError::BadFrameIndex(frame.index as i64));
        }
        let resp = self.roundtrip(
            transport,
            &DebuggerRequest::FrameEvaluate {
                index: frame.index as u32,
                text: text.to_string(),
            },
        )?;
        Ok(serde_json::from_value(resp["result"].clone())?)
    }

    fn vend(&self, id: u32) -> ObjectProxy {
        ObjectProxy {
            id,
            generation: self.generation,
        }
    }

    fn check(&self, object: &ObjectProxy) -> Result<u32, BridgeError> {
        if object.generation != self.generation {
            return Err(BridgeError::StaleHandle);
        }
        Ok(object.id)
    }

    fn roundtrip(
        &mut self,
        transport: &mut dyn RequestTransport,
        request: &DebuggerRequest,
    ) -> Result<Value, BridgeError> {
        let json = serde_json::to_string(request)?;
        let response = transport.request(&json)?;
        let value: Value = serde_json::from_str(&response)?;
        if let Some(message) = value.get("exception").and_then(Value::as_str) {
            return Err(BridgeError::Exception(message.to_string()));
        }
        Ok(value)
    }
}

impl Default for DebuggerProxy {
    fn default() -> Self {
        Self::new()
    }
}
