use std::collections::HashMap;
use std::hash::Hash;

use serde_json::json;
use tracing::trace;

use crate::protocol::ScriptId;

use super::request::{exception, DebuggerRequest};
use super::value::JsValue;
use super::SpecialValue;

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptInfo {
    pub id: ScriptId,
    pub url: String,
    pub entry_offset: u32,
}

/// A stack frame as the debuggee describes it. `callee` and `this_value`
/// are raw values; the server converts handles to per-pause ids.
#[derive(Debug, Clone)]
pub struct FrameInfo<H> {
    pub script: ScriptId,
    pub offset: u32,
    pub callee: RawValue<H>,
    pub this_value: RawValue<H>,
}

/// A value as the debuggee produces it, before object handles are turned
/// into wire ids.
#[derive(Debug, Clone)]
pub enum RawValue<H> {
    Object(H),
    Special(SpecialValue),
    Primitive(serde_json::Value),
}

/// Why a debuggee operation could not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum DebuggeeFault {
    /// The operation needed effects replay cannot absorb; the pause must
    /// be reconstructed from its temporary checkpoint.
    UnhandledDivergence,
    /// An ordinary error, reported as an exception response.
    Error(String),
}

/// The paused execution state a replay server answers requests against.
pub trait Debuggee {
    type ObjectHandle: Clone + Eq + Hash;

    fn scripts(&self) -> Vec<ScriptInfo>;
    fn script(&self, id: ScriptId) -> Option<ScriptInfo>;
    /// The script whose creation the current pause is at, if the pause is
    /// a NewScript event.
    fn new_script(&self) -> Option<ScriptId>;
    fn source(&self, id: ScriptId) -> Option<String>;

    fn frame_depth(&self) -> usize;
    fn frame(&self, index: usize) -> Option<FrameInfo<Self::ObjectHandle>>;

    fn object_class(&self, handle: &Self::ObjectHandle) -> String;
    fn object_properties(
        &mut self,
        handle: &Self::ObjectHandle,
    ) -> Result<Vec<(String, RawValue<Self::ObjectHandle>)>, DebuggeeFault>;
    fn environment_names(
        &mut self,
        handle: &Self::ObjectHandle,
    ) -> Result<Vec<String>, DebuggeeFault>;
    fn evaluate(
        &mut self,
        frame_index: usize,
        text: &str,
    ) -> Result<RawValue<Self::ObjectHandle>, DebuggeeFault>;
    fn pop_frame_result(&self) -> Option<RawValue<Self::ObjectHandle>>;
}

/// Vends dense ids for object handles within one pause. Ids start at 1;
/// 0 is reserved to mean "no object".
struct IdMap<H: Clone + Eq + Hash> {
    by_handle: HashMap<H, u32>,
    by_id: Vec<H>,
}

impl<H: Clone + Eq + Hash> IdMap<H> {
    fn new() -> Self {
        IdMap {
            by_handle: HashMap::new(),
            by_id: Vec::new(),
        }
    }

    fn id(&mut self, handle: H) -> u32 {
        if let Some(id) = self.by_handle.get(&handle) {
            return *id;
        }
        self.by_id.push(handle.clone());
        let id = self.by_id.len() as u32;
        self.by_handle.insert(handle, id);
        id
    }

    fn get(&self, id: u32) -> Option<&H> {
        if id == 0 {
            return None;
        }
        self.by_id.get((id - 1) as usize)
    }
}

/// Result of processing one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Response {
        json: String,
        /// Whether this request moved the pause into the diverged state.
        diverged_now: bool,
    },
    /// The request triggered an unhandled divergence; the caller must
    /// reconstruct the pause and replay its request log.
    UnhandledDivergence,
}

/// Executes debugger requests against a paused debuggee, owning the
/// per-pause id map and divergence state. `reset_pause` must be called
/// whenever execution moves.
pub struct ReplayServer<H: Clone + Eq + Hash> {
    objects: IdMap<H>,
    diverged: bool,
}

impl<H: Clone + Eq + Hash> ReplayServer<H> {
    pub fn new() -> Self {
        ReplayServer {
            objects: IdMap::new(),
            diverged: false,
        }
    }

    /// Invalidate every vended id and clear divergence state.
    pub fn reset_pause(&mut self) {
        self.objects = IdMap::new();
        self.diverged = false;
    }

    pub fn diverged(&self) -> bool {
        self.diverged
    }

    /// Handle one request. `divergence_allowed` reflects whether the
    /// current pause can absorb diverged effects at all, and is false when
    /// replaying a request that previously caused an unhandled divergence.
    pub fn process<D: Debuggee<ObjectHandle = H>>(
        &mut self,
        debuggee: &mut D,
        divergence_allowed: bool,
        request_json: &str,
    ) -> ProcessOutcome {
        let was_diverged = self.diverged;
        let request: DebuggerRequest = match serde_json::from_str(request_json) {
            Ok(request) => request,
            Err(err) => {
                return self.respond(was_diverged, exception(format!("malformed request: {err}")))
            }
        };
        trace!(?request, "debugger request");

        let response = match request {
            DebuggerRequest::FindScripts => {
                let ids: Vec<ScriptId> = debuggee.scripts().iter().map(|s| s.id).collect();
                json!({ "scripts": ids })
            }
            DebuggerRequest::GetScript { script } => match debuggee.script(script) {
                Some(info) => json!({
                    "id": info.id,
                    "url": info.url,
                    "entryOffset": info.entry_offset,
                }),
                None => exception(format!("unknown script {script}")),
            },
            DebuggerRequest::GetNewScript => {
                json!({ "script": debuggee.new_script().unwrap_or(0) })
            }
            DebuggerRequest::GetSource { script } => match debuggee.source(script) {
                Some(source) => json!({ "source": source }),
                None => exception(format!("no source for script {script}")),
            },
            DebuggerRequest::GetObject { object } => match self.objects.get(object).cloned() {
                Some(handle) => json!({
                    "id": object,
                    "class": debuggee.object_class(&handle),
                }),
                None => exception(format!("unknown object {object}")),
            },
            DebuggerRequest::GetObjectProperties { object } => {
                if !self.maybe_diverge(divergence_allowed) {
                    json!({ "divergence": "getObjectProperties" })
                } else {
                    match self.objects.get(object).cloned() {
                        Some(handle) => match debuggee.object_properties(&handle) {
                            Ok(props) => {
                                let props: Vec<serde_json::Value> = props
                                    .into_iter()
                                    .map(|(name, value)| {
                                        let value = self.encode(value);
                                        json!({ "name": name, "value": value })
                                    })
                                    .collect();
                                json!({ "properties": props })
                            }
                            Err(DebuggeeFault::UnhandledDivergence) => {
                                return ProcessOutcome::UnhandledDivergence
                            }
                            Err(DebuggeeFault::Error(msg)) => exception(msg),
                        },
                        None => exception(format!("unknown object {object}")),
                    }
                }
            }
            DebuggerRequest::GetEnvironmentNames { environment } => {
                if !self.maybe_diverge(divergence_allowed) {
                    json!({ "divergence": "getEnvironmentNames" })
                } else {
                    match self.objects.get(environment).cloned() {
                        Some(handle) => match debuggee.environment_names(&handle) {
                            Ok(names) => json!({ "names": names }),
                            Err(DebuggeeFault::UnhandledDivergence) => {
                                return ProcessOutcome::UnhandledDivergence
                            }
                            Err(DebuggeeFault::Error(msg)) => exception(msg),
                        },
                        None => exception(format!("unknown environment {environment}")),
                    }
                }
            }
            DebuggerRequest::GetFrame { index } => {
                let depth = debuggee.frame_depth();
                let resolved = if index < 0 {
                    depth.checked_sub(1)
                } else {
                    Some(index as usize).filter(|i| *i < depth)
                };
                match resolved.and_then(|i| debuggee.frame(i).map(|f| (i, f))) {
                    Some((i, frame)) => {
                        let callee = self.encode(frame.callee);
                        let this_value = self.encode(frame.this_value);
                        json!({
                            "depth": depth,
                            "frame": {
                                "index": i,
                                "script": frame.script,
                                "offset": frame.offset,
                                "callee": callee,
                                "this": this_value,
                            },
                        })
                    }
                    None => json!({ "depth": depth, "frame": null }),
                }
            }
            DebuggerRequest::FrameEvaluate { index, text } => {
                if !self.maybe_diverge(divergence_allowed) {
                    json!({ "divergence": "frameEvaluate" })
                } else {
                    match debuggee.evaluate(index as usize, &text) {
                        Ok(value) => {
                            let value = self.encode(value);
                            json!({ "result": value })
                        }
                        Err(DebuggeeFault::UnhandledDivergence) => {
                            return ProcessOutcome::UnhandledDivergence
                        }
                        Err(DebuggeeFault::Error(msg)) => exception(msg),
                    }
                }
            }
            DebuggerRequest::PopFrameResult => match debuggee.pop_frame_result() {
                Some(value) => {
                    let value = self.encode(value);
                    json!({ "result": value })
                }
                None => json!({ "result": JsValue::undefined() }),
            },
        };
        self.respond(was_diverged, response)
    }

    fn respond(&self, was_diverged: bool, response: serde_json::Value) -> ProcessOutcome {
        ProcessOutcome::Response {
            json: response.to_string(),
            diverged_now: self.diverged && !was_diverged,
        }
    }

    fn maybe_diverge(&mut self, allowed: bool) -> bool {
        if !allowed {
            return false;
        }
        self.diverged = true;
        true
    }

    fn encode(&mut self, value: RawValue<H>) -> JsValue {
        match value {
            RawValue::Object(handle) => JsValue::object(self.objects.id(handle)),
            RawValue::Special(special) => JsValue::Special { special },
            RawValue::Primitive(value) => JsValue::Primitive { primitive: value },
        }
    }
}

impl<H: Clone + Eq + Hash> Default for ReplayServer<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal scripted debuggee for server tests: one script, one frame.
    struct Toy {
        fail_eval: bool,
    }

    impl Debuggee for Toy {
        type ObjectHandle = &'static str;

        fn scripts(&self) -> Vec<ScriptInfo> {
            vec![ScriptInfo {
                id: 1,
                url: "toy.js".into(),
                entry_offset: 0,
            }]
        }
        fn script(&self, id: ScriptId) -> Option<ScriptInfo> {
            (id == 1).then(|| self.scripts().remove(0))
        }
        fn new_script(&self) -> Option<ScriptId> {
            None
        }
        fn source(&self, id: ScriptId) -> Option<String> {
            (id == 1).then(|| "function toy() {}".to_string())
        }
        fn frame_depth(&self) -> usize {
            1
        }
        fn frame(&self, index: usize) -> Option<FrameInfo<&'static str>> {
            (index == 0).then(|| FrameInfo {
                script: 1,
                offset: 4,
                callee: RawValue::Object("toy"),
                this_value: RawValue::Special(SpecialValue::Undefined),
            })
        }
        fn object_class(&self, handle: &&'static str) -> String {
            format!("Function({handle})")
        }
        fn object_properties(
            &mut self,
            _: &&'static str,
        ) -> Result<Vec<(String, RawValue<&'static str>)>, DebuggeeFault> {
            Ok(vec![(
                "length".into(),
                RawValue::Primitive(serde_json::json!(0)),
            )])
        }
        fn environment_names(&mut self, _: &&'static str) -> Result<Vec<String>, DebuggeeFault> {
            Ok(vec!["x".into()])
        }
        fn evaluate(
            &mut self,
            _: usize,
            text: &str,
        ) -> Result<RawValue<&'static str>, DebuggeeFault> {
            if self.fail_eval {
                Err(DebuggeeFault::UnhandledDivergence)
            } else {
                Ok(RawValue::Primitive(serde_json::json!(text.len())))
            }
        }
        fn pop_frame_result(&self) -> Option<RawValue<&'static str>> {
            None
        }
    }

    fn response_json(outcome: ProcessOutcome) -> serde_json::Value {
        match outcome {
            ProcessOutcome::Response { json, .. } => serde_json::from_str(&json).unwrap(),
            ProcessOutcome::UnhandledDivergence => panic!("unexpected unhandled divergence"),
        }
    }

    #[test]
    fn ids_are_dense_and_stable_within_a_pause() {
        let mut server = ReplayServer::new();
        let mut toy = Toy { fail_eval: false };
        let frame =
            response_json(server.process(&mut toy, true, r#"{"kind":"getFrame","index":-1}"#));
        assert_eq!(frame["frame"]["callee"]["object"], 1);
        // Same handle, same id.
        let again =
            response_json(server.process(&mut toy, true, r#"{"kind":"getFrame","index":0}"#));
        assert_eq!(again["frame"]["callee"]["object"], 1);

        server.reset_pause();
        let fresh =
            response_json(server.process(&mut toy, true, r#"{"kind":"getFrame","index":0}"#));
        assert_eq!(fresh["frame"]["callee"]["object"], 1);
    }

    #[test]
    fn divergence_gated_requests_return_canned_responses_when_refused() {
        let mut server = ReplayServer::new();
        let mut toy = Toy { fail_eval: false };
        let resp = response_json(server.process(
            &mut toy,
            false,
            r#"{"kind":"frameEvaluate","index":0,"text":"1+1"}"#,
        ));
        assert_eq!(resp["divergence"], "frameEvaluate");
        assert!(!server.diverged());
    }

    #[test]
    fn first_diverging_request_reports_divergence() {
        let mut server = ReplayServer::new();
        let mut toy = Toy { fail_eval: false };
        match server.process(
            &mut toy,
            true,
            r#"{"kind":"frameEvaluate","index":0,"text":"1+1"}"#,
        ) {
            ProcessOutcome::Response { diverged_now, .. } => assert!(diverged_now),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(server.diverged());
    }

    #[test]
    fn unhandled_divergence_is_surfaced() {
        let mut server = ReplayServer::new();
        let mut toy = Toy { fail_eval: true };
        let outcome = server.process(
            &mut toy,
            true,
            r#"{"kind":"frameEvaluate","index":0,"text":"mutate()"}"#,
        );
        assert_eq!(outcome, ProcessOutcome::UnhandledDivergence);
    }

    #[test]
    fn unknown_object_is_an_exception_not_a_failure() {
        let mut server = ReplayServer::<&'static str>::new();
        let mut toy = Toy { fail_eval: false };
        let resp = response_json(server.process(&mut toy, true, r#"{"kind":"getObject","object":99}"#));
        assert!(resp["exception"].is_string());
    }
}
