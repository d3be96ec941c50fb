use std::collections::{HashMap, HashSet};

use serde_json::json;

use crate::bridge::{Debuggee, DebuggeeFault, FrameInfo, RawValue, ScriptInfo, SpecialValue};
use crate::protocol::{CheckpointId, Position, Progress, ScriptId};
use crate::replay::{CheckpointHandle, EngineEvent, ExecutionEngine, Watch};
use crate::tape::TapeEntry;

use super::{Scenario, SharedTape};

/// Object handles the simulated debuggee vends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimObject {
    Global,
    /// The function whose frame is executing a script.
    Callee(ScriptId),
}

#[derive(Debug, Clone, PartialEq)]
struct SimScript {
    id: ScriptId,
    url: String,
    entry_offset: u32,
    source: String,
}

#[derive(Debug, Clone, Default)]
struct Frame {
    /// Unknown until the first site step executed inside the frame.
    script: Option<ScriptId>,
    offset: u32,
}

/// Everything a checkpoint snapshot has to capture.
#[derive(Debug, Clone, Default)]
struct State {
    cursor: usize,
    progress: Progress,
    checkpoint: CheckpointId,
    scripts: Vec<SimScript>,
    frames: Vec<Frame>,
    pop_result: Option<serde_json::Value>,
    new_script: Option<ScriptId>,
}

enum Mode {
    Recording { scenario: Vec<TapeEntry>, next: usize },
    Replaying,
}

/// A deterministic engine over the shared tape.
///
/// Recording mode executes a scenario, assigning progress values and
/// checkpoint ids and appending everything to the tape; replaying mode
/// consumes flushed tape entries. Snapshots are whole-state clones, which
/// is exactly what makes restores exact.
pub struct ScriptedEngine {
    tape: SharedTape,
    mode: Mode,
    state: State,
    saved: HashMap<CheckpointId, State>,
    temps: Vec<(CheckpointHandle, State)>,
    save_directives: HashSet<CheckpointId>,
    watch_sites: HashSet<(ScriptId, u32)>,
    watch_enter_frame: bool,
    watch_pop_any: bool,
    watch_pop_scripts: HashSet<ScriptId>,
    pending_checkpoint: bool,
}

impl ScriptedEngine {
    pub fn recording(tape: SharedTape, scenario: Scenario) -> Self {
        ScriptedEngine::new(tape, Mode::Recording {
            scenario: scenario.into_entries(),
            next: 0,
        })
    }

    pub fn replaying(tape: SharedTape) -> Self {
        ScriptedEngine::new(tape, Mode::Replaying)
    }

    fn new(tape: SharedTape, mode: Mode) -> Self {
        ScriptedEngine {
            tape,
            mode,
            state: State::default(),
            saved: HashMap::new(),
            temps: Vec::new(),
            save_directives: HashSet::new(),
            watch_sites: HashSet::new(),
            watch_enter_frame: false,
            watch_pop_any: false,
            watch_pop_scripts: HashSet::new(),
            pending_checkpoint: false,
        }
    }

    /// Produce the next materialized tape entry, or `None` at the
    /// endpoint. Recording assigns ids and appends to the tape here.
    fn next_entry(&mut self) -> Option<TapeEntry> {
        match &mut self.mode {
            Mode::Replaying => {
                let entry = self.tape.get(self.state.cursor)?;
                self.state.cursor += 1;
                Some(entry)
            }
            Mode::Recording { scenario, next } => {
                let template = if self.pending_checkpoint {
                    self.pending_checkpoint = false;
                    TapeEntry::Checkpoint {
                        id: 0,
                        progress: 0,
                        duration_us: 0,
                    }
                } else if *next < scenario.len() {
                    let template = scenario[*next].clone();
                    *next += 1;
                    template
                } else {
                    return None;
                };
                let entry = match template {
                    TapeEntry::Checkpoint { duration_us, .. } => TapeEntry::Checkpoint {
                        id: self.state.checkpoint + 1,
                        progress: self.state.progress,
                        duration_us,
                    },
                    TapeEntry::Script {
                        id,
                        url,
                        entry_offset,
                        source,
                        ..
                    } => TapeEntry::Script {
                        id,
                        url,
                        entry_offset,
                        source,
                        progress: self.state.progress + 1,
                    },
                    TapeEntry::Step { position, .. } => TapeEntry::Step {
                        progress: self.state.progress + 1,
                        position,
                    },
                };
                self.tape.append(entry.clone());
                Some(entry)
            }
        }
    }

    /// Update state for one entry and decide whether it is reportable.
    fn apply(&mut self, entry: TapeEntry) -> Option<EngineEvent> {
        match entry {
            TapeEntry::Script {
                id,
                url,
                entry_offset,
                source,
                progress,
            } => {
                self.state.progress = progress;
                self.state.scripts.push(SimScript {
                    id,
                    url,
                    entry_offset,
                    source,
                });
                self.state.new_script = Some(id);
                Some(EngineEvent::NewScript {
                    script: id,
                    progress,
                })
            }
            TapeEntry::Checkpoint {
                id,
                progress,
                duration_us,
            } => {
                self.state.progress = progress;
                self.state.checkpoint = id;
                self.state.new_script = None;
                // Passing a normal checkpoint invalidates temporaries.
                self.temps.clear();
                if self.save_directives.contains(&id) {
                    self.saved.insert(id, self.state.clone());
                }
                Some(EngineEvent::Checkpoint { id, duration_us })
            }
            TapeEntry::Step { progress, position } => {
                self.state.progress = progress;
                self.state.new_script = None;
                match position {
                    Position::EnterFrame => {
                        self.state.pop_result = None;
                        self.state.frames.push(Frame::default());
                        self.watch_enter_frame.then_some(EngineEvent::Position {
                            position: Position::EnterFrame,
                            progress,
                        })
                    }
                    Position::OnPop { script } => {
                        self.state.frames.pop();
                        self.state.pop_result = Some(json!(format!("return@{progress}")));
                        let watched = self.watch_pop_any
                            || script.is_some_and(|s| self.watch_pop_scripts.contains(&s));
                        watched.then_some(EngineEvent::Position {
                            position: Position::OnPop { script },
                            progress,
                        })
                    }
                    Position::Break { script, offset } => {
                        self.state.pop_result = None;
                        if let Some(top) = self.state.frames.last_mut() {
                            top.script = Some(script);
                            top.offset = offset;
                        }
                        let frame_index = self.state.frames.len().saturating_sub(1) as u32;
                        self.watch_sites
                            .contains(&(script, offset))
                            .then_some(EngineEvent::Position {
                                position: Position::OnStep {
                                    script,
                                    offset,
                                    frame_index,
                                },
                                progress,
                            })
                    }
                    // Tapes never carry these step kinds.
                    Position::OnStep { .. } | Position::NewScript => None,
                }
            }
        }
    }

    fn find_script(&self, id: ScriptId) -> Option<&SimScript> {
        self.state.scripts.iter().find(|s| s.id == id)
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn run_to_next_event(&mut self) -> EngineEvent {
        loop {
            let Some(entry) = self.next_entry() else {
                self.state.new_script = None;
                return EngineEvent::RecordingEndpoint {
                    progress: self.state.progress,
                };
            };
            if let Some(event) = self.apply(entry) {
                return event;
            }
        }
    }

    fn set_save_checkpoint(&mut self, checkpoint: CheckpointId, save: bool) {
        if save {
            self.save_directives.insert(checkpoint);
        } else {
            self.save_directives.remove(&checkpoint);
        }
    }

    fn has_saved(&self, checkpoint: CheckpointId) -> bool {
        self.saved.contains_key(&checkpoint)
    }

    fn save_temporary(&mut self) -> CheckpointHandle {
        let temporary = self.temps.last().map(|(h, _)| h.temporary + 1).unwrap_or(1);
        let handle = CheckpointHandle {
            normal: self.state.checkpoint,
            temporary,
        };
        self.temps.push((handle, self.state.clone()));
        handle
    }

    fn restore(&mut self, handle: CheckpointHandle) {
        if handle.is_temporary() {
            let idx = self
                .temps
                .iter()
                .position(|(h, _)| *h == handle)
                .expect("temporary checkpoint not held");
            self.state = self.temps[idx].1.clone();
            self.temps.truncate(idx + 1);
        } else {
            self.state = self
                .saved
                .get(&handle.normal)
                .expect("checkpoint not saved")
                .clone();
            self.temps.clear();
        }
    }

    fn install_watch(&mut self, watch: Watch) {
        match watch {
            Watch::Site { script, offset } => {
                self.watch_sites.insert((script, offset));
            }
            Watch::EnterFrame => self.watch_enter_frame = true,
            Watch::FramePop { script: None } => self.watch_pop_any = true,
            Watch::FramePop {
                script: Some(script),
            } => {
                self.watch_pop_scripts.insert(script);
            }
        }
    }

    fn clear_watches(&mut self) {
        self.watch_sites.clear();
        self.watch_enter_frame = false;
        self.watch_pop_any = false;
        self.watch_pop_scripts.clear();
    }

    fn request_checkpoint(&mut self) {
        if matches!(self.mode, Mode::Recording { .. }) {
            self.pending_checkpoint = true;
        }
    }

    fn flush_recording(&mut self) -> bool {
        match self.mode {
            Mode::Recording { .. } => self.tape.flush(),
            Mode::Replaying => true,
        }
    }

    fn script_exists(&self, script: ScriptId) -> bool {
        self.find_script(script).is_some()
    }

    fn entry_offset(&self, script: ScriptId) -> Option<u32> {
        self.find_script(script).map(|s| s.entry_offset)
    }

    fn last_checkpoint(&self) -> CheckpointId {
        self.state.checkpoint
    }

    fn progress(&self) -> Progress {
        self.state.progress
    }
}

impl Debuggee for ScriptedEngine {
    type ObjectHandle = SimObject;

    fn scripts(&self) -> Vec<ScriptInfo> {
        self.state
            .scripts
            .iter()
            .map(|s| ScriptInfo {
                id: s.id,
                url: s.url.clone(),
                entry_offset: s.entry_offset,
            })
            .collect()
    }

    fn script(&self, id: ScriptId) -> Option<ScriptInfo> {
        self.find_script(id).map(|s| ScriptInfo {
            id: s.id,
            url: s.url.clone(),
            entry_offset: s.entry_offset,
        })
    }

    fn new_script(&self) -> Option<ScriptId> {
        self.state.new_script
    }

    fn source(&self, id: ScriptId) -> Option<String> {
        self.find_script(id).map(|s| s.source.clone())
    }

    fn frame_depth(&self) -> usize {
        self.state.frames.len()
    }

    fn frame(&self, index: usize) -> Option<FrameInfo<SimObject>> {
        let frame = self.state.frames.get(index)?;
        let callee = match frame.script {
            Some(script) => RawValue::Object(SimObject::Callee(script)),
            None => RawValue::Special(SpecialValue::Undefined),
        };
        Some(FrameInfo {
            script: frame.script.unwrap_or(0),
            offset: frame.offset,
            callee,
            this_value: RawValue::Special(SpecialValue::Undefined),
        })
    }

    fn object_class(&self, handle: &SimObject) -> String {
        match handle {
            SimObject::Global => "global".to_string(),
            SimObject::Callee(_) => "Function".to_string(),
        }
    }

    fn object_properties(
        &mut self,
        handle: &SimObject,
    ) -> Result<Vec<(String, RawValue<SimObject>)>, DebuggeeFault> {
        match handle {
            SimObject::Global => Ok(vec![(
                "scriptCount".to_string(),
                RawValue::Primitive(json!(self.state.scripts.len())),
            )]),
            SimObject::Callee(script) => {
                let url = self
                    .find_script(*script)
                    .map(|s| s.url.clone())
                    .unwrap_or_default();
                Ok(vec![
                    ("name".to_string(), RawValue::Primitive(json!(url))),
                    ("script".to_string(), RawValue::Primitive(json!(*script))),
                ])
            }
        }
    }

    fn environment_names(&mut self, _: &SimObject) -> Result<Vec<String>, DebuggeeFault> {
        Ok(vec!["this".to_string(), "arguments".to_string()])
    }

    fn evaluate(
        &mut self,
        frame_index: usize,
        text: &str,
    ) -> Result<RawValue<SimObject>, DebuggeeFault> {
        if text == "__diverge__" {
            return Err(DebuggeeFault::UnhandledDivergence);
        }
        if let Some(message) = text.strip_prefix("throw ") {
            return Err(DebuggeeFault::Error(message.to_string()));
        }
        if text == "callee" {
            return Ok(match self.state.frames.get(frame_index).and_then(|f| f.script) {
                Some(script) => RawValue::Object(SimObject::Callee(script)),
                None => RawValue::Special(SpecialValue::Undefined),
            });
        }
        Ok(RawValue::Primitive(json!(format!(
            "eval:{text}@{}",
            self.state.progress
        ))))
    }

    fn pop_frame_result(&self) -> Option<RawValue<SimObject>> {
        self.state.pop_result.clone().map(RawValue::Primitive)
    }
}
