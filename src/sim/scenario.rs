use crate::protocol::{Position, ScriptId};
use crate::tape::TapeEntry;

/// A scripted program for the simulated recording child to "execute".
///
/// The builder produces tape entry templates; the recording engine assigns
/// real progress values and checkpoint ids as it runs through them, so a
/// scenario only describes order and content.
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    entries: Vec<TapeEntry>,
    next_script: ScriptId,
}

impl Scenario {
    pub fn new() -> Self {
        Scenario {
            entries: Vec::new(),
            next_script: 1,
        }
    }

    /// A checkpoint boundary, charged with the given non-idle execution
    /// time.
    pub fn checkpoint(mut self, duration_us: u64) -> Self {
        self.entries.push(TapeEntry::Checkpoint {
            id: 0,
            progress: 0,
            duration_us,
        });
        self
    }

    /// A script becoming known. Returns the id it will have.
    pub fn script(mut self, url: &str, source: &str) -> (Self, ScriptId) {
        let id = self.next_script;
        self.next_script += 1;
        self.entries.push(TapeEntry::Script {
            id,
            url: url.to_string(),
            entry_offset: 0,
            source: source.to_string(),
            progress: 0,
        });
        (self, id)
    }

    pub fn enter_frame(mut self) -> Self {
        self.entries.push(TapeEntry::Step {
            progress: 0,
            position: Position::EnterFrame,
        });
        self
    }

    /// Execution reaching a (script, offset) site.
    pub fn step(mut self, script: ScriptId, offset: u32) -> Self {
        self.entries.push(TapeEntry::Step {
            progress: 0,
            position: Position::Break { script, offset },
        });
        self
    }

    pub fn pop_frame(mut self, script: ScriptId) -> Self {
        self.entries.push(TapeEntry::Step {
            progress: 0,
            position: Position::OnPop {
                script: Some(script),
            },
        });
        self
    }

    pub fn into_entries(self) -> Vec<TapeEntry> {
        self.entries
    }

    /// A small program with two scripts and a repeating loop body, enough
    /// to exercise breakpoints, rewinding, and frame inspection.
    pub fn demo() -> Scenario {
        let (scenario, main) = Scenario::new()
            .checkpoint(0)
            .script("main.js", "function main() { loop(); }");
        let (mut scenario, lib) = scenario.script("lib.js", "function loop() { work(); }");
        scenario = scenario.enter_frame().step(main, 0).step(main, 4);
        for round in 0..4u64 {
            scenario = scenario
                .checkpoint(900_000)
                .enter_frame()
                .step(lib, 0)
                .step(lib, 8)
                .step(lib, 16)
                .pop_frame(lib);
            if round == 2 {
                scenario = scenario.step(main, 8);
            }
        }
        scenario
            .checkpoint(900_000)
            .step(main, 12)
            .pop_frame(main)
            .checkpoint(100_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_scenario_shape() {
        let entries = Scenario::demo().into_entries();
        let checkpoints = entries
            .iter()
            .filter(|e| matches!(e, TapeEntry::Checkpoint { .. }))
            .count();
        assert_eq!(checkpoints, 7);
        assert!(matches!(entries[0], TapeEntry::Checkpoint { .. }));
        let scripts: Vec<ScriptId> = entries
            .iter()
            .filter_map(|e| match e {
                TapeEntry::Script { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(scripts, vec![1, 2]);
    }
}
