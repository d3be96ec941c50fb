use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session tunables. Defaults match the behavior described in module docs;
/// tests shrink the intervals to keep scenarios fast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Whether replaying children are launched at all. With rewinding
    /// disabled the session is record-and-run-forward only.
    pub rewinding_enabled: bool,

    /// How long a child may go without sending a message while we are
    /// waiting on it before it is treated as hung.
    pub hang_timeout_ms: u64,

    /// How many times a replaying child may be restarted after a crash or
    /// hang before the session gives up.
    pub max_restarts: u32,

    /// Minimum accumulated non-idle execution time between major
    /// checkpoint assignments.
    pub major_checkpoint_interval_ms: u64,

    /// Minimum wall time between recording flushes on forward resume.
    pub flush_interval_ms: u64,

    /// A replaying child only saves a temporary checkpoint when more than
    /// this much wall time elapsed since execution last resumed.
    pub temporary_checkpoint_threshold_ms: u64,

    /// Testing override: save temporary checkpoints unconditionally, so
    /// navigation paths that depend on them are exercised deterministically.
    pub always_save_temporary_checkpoints: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rewinding_enabled: true,
            hang_timeout_ms: 5_000,
            max_restarts: 5,
            major_checkpoint_interval_ms: 2_000,
            flush_interval_ms: 500,
            temporary_checkpoint_threshold_ms: 10,
            always_save_temporary_checkpoints: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path)?;
        let config = toml::from_str(&text)?;
        Ok(config)
    }

    pub fn hang_timeout(&self) -> Duration {
        Duration::from_millis(self.hang_timeout_ms)
    }

    pub fn major_checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.major_checkpoint_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn temporary_checkpoint_threshold(&self) -> Duration {
        Duration::from_millis(self.temporary_checkpoint_threshold_ms)
    }
}
