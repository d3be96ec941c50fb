use serde::{Deserialize, Serialize};

/// Identifier for a script in the recording. Script ids are assigned in
/// creation order as the recording executes; 0 is never a valid id and is
/// used on the wire to encode "no script".
pub type ScriptId = u32;

/// A place in script execution where a breakpoint can be set or a hit can
/// be reported.
///
/// `Break` and `OnStep` name a bytecode offset within a script; `OnStep`
/// additionally pins a frame index so it only fires in one activation.
/// `OnPop` fires when a frame finishes, either for one script or for any
/// (`script: None`). `EnterFrame` and `NewScript` carry no operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Position {
    Break {
        script: ScriptId,
        offset: u32,
    },
    OnStep {
        script: ScriptId,
        offset: u32,
        #[serde(rename = "frameIndex")]
        frame_index: u32,
    },
    OnPop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        script: Option<ScriptId>,
    },
    EnterFrame,
    NewScript,
}

impl Position {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Position::Break { .. } => "Break",
            Position::OnStep { .. } => "OnStep",
            Position::OnPop { .. } => "OnPop",
            Position::EnterFrame => "EnterFrame",
            Position::NewScript => "NewScript",
        }
    }

    /// The script this position is tied to, if any.
    pub fn script(&self) -> Option<ScriptId> {
        match self {
            Position::Break { script, .. } | Position::OnStep { script, .. } => Some(*script),
            Position::OnPop { script } => *script,
            Position::EnterFrame | Position::NewScript => None,
        }
    }

    /// Whether execution stopping at `self` necessarily also stops at
    /// `other`. Equal positions subsume each other; `Break` subsumes
    /// `OnStep` at the same script and offset (a frame-pinned step is a
    /// strict narrowing); a script-agnostic `OnPop` subsumes a
    /// script-specific one.
    pub fn subsumes(&self, other: &Position) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (
                Position::Break { script, offset },
                Position::OnStep {
                    script: s2,
                    offset: o2,
                    ..
                },
            ) => script == s2 && offset == o2,
            (Position::OnPop { script: None }, Position::OnPop { script: Some(_) }) => true,
            _ => false,
        }
    }

    /// Whether a concrete hit reported by the engine triggers a breakpoint
    /// set at `self`. Hits are always fully specified (`OnStep` carries
    /// its frame index, `OnPop` its script), so a hit triggers every
    /// position that subsumes it.
    pub fn matches_hit(&self, hit: &Position) -> bool {
        self.subsumes(hit)
    }
}
