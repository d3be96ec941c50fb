use std::collections::HashSet;

use tracing::trace;

use crate::protocol::{Position, ScriptId};

use super::engine::{ExecutionEngine, Watch};

/// Tracks which engine watches are installed and installs new ones on
/// demand, one per distinct site. Positions naming scripts the engine has
/// not seen yet are queued and retried whenever a new script appears.
#[derive(Debug, Default)]
pub struct WatchManager {
    sites: HashSet<(ScriptId, u32)>,
    enter_frame: bool,
    pop_scripts: HashSet<ScriptId>,
    pop_any: bool,
    pending: Vec<Position>,
}

impl WatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every installed watch, ours and the engine's.
    pub fn reset(&mut self, engine: &mut dyn ExecutionEngine) {
        engine.clear_watches();
        *self = Self::default();
    }

    /// Make sure a watch covering `position` is installed, or queue it if
    /// its script does not exist yet.
    pub fn ensure(&mut self, engine: &mut dyn ExecutionEngine, position: &Position) {
        match position {
            Position::Break { script, offset } | Position::OnStep { script, offset, .. } => {
                if !engine.script_exists(*script) {
                    trace!(script, "watch deferred until script exists");
                    self.pending.push(*position);
                } else if self.sites.insert((*script, *offset)) {
                    engine.install_watch(Watch::Site {
                        script: *script,
                        offset: *offset,
                    });
                }
            }
            Position::OnPop {
                script: Some(script),
            } => {
                if !engine.script_exists(*script) {
                    self.pending.push(*position);
                } else if self.pop_scripts.insert(*script) {
                    engine.install_watch(Watch::FramePop {
                        script: Some(*script),
                    });
                }
            }
            Position::OnPop { script: None } => {
                if !self.pop_any {
                    self.pop_any = true;
                    engine.install_watch(Watch::FramePop { script: None });
                }
            }
            Position::EnterFrame => {
                if !self.enter_frame {
                    self.enter_frame = true;
                    engine.install_watch(Watch::EnterFrame);
                }
            }
            // New scripts are always reported by the engine.
            Position::NewScript => {}
        }
    }

    /// Retry queued installs that were waiting on this script.
    pub fn on_new_script(&mut self, engine: &mut dyn ExecutionEngine, script: ScriptId) {
        let (ready, still_pending): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|p| p.script() == Some(script));
        self.pending = still_pending;
        for position in ready {
            self.ensure(engine, &position);
        }
    }
}
