use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use tracing::debug;

use crate::config::Config;
use crate::middleman::{ChannelHandler, ChildHandle, SessionError, SpawnedChild, Spawner};
use crate::protocol::{Channel, CheckpointId};
use crate::replay::{ChildKind, ChildOptions, NavigationSettings, ReplayChild};

use super::{Scenario, ScriptedEngine, SharedTape};

/// An intentional fault to arm on the nth spawn of a child kind, counted
/// from zero. Respawns of the same slot get fresh spawn indices, so a
/// fault on index 0 does not re-fire in the replacement process.
#[derive(Debug, Clone)]
pub struct SimFault {
    pub kind: ChildKind,
    pub spawn_index: usize,
    pub crash_at_checkpoint: Option<CheckpointId>,
    pub hang_at_checkpoint: Option<CheckpointId>,
}

/// Control handle over one simulated child thread.
pub struct SimChildHandle {
    pid: u32,
    stop: Arc<AtomicBool>,
    stream: UnixStream,
}

impl ChildHandle for SimChildHandle {
    fn kill(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn pid(&self) -> u32 {
        self.pid
    }
}

/// Hosts simulated children on threads. Each spawn builds a socket pair,
/// wires the middleman end into the supplied handler, and runs a full
/// `ReplayChild` loop over a `ScriptedEngine` on its own thread.
pub struct SimSpawner {
    tape: SharedTape,
    scenario: Scenario,
    settings: SimSettings,
    faults: Vec<SimFault>,
    spawned_recording: usize,
    spawned_replaying: usize,
    next_pid: u32,
}

#[derive(Clone)]
struct SimSettings {
    temporary_checkpoint_threshold: std::time::Duration,
    always_save_temporary_checkpoints: bool,
}

impl SimSpawner {
    pub fn new(scenario: Scenario, config: &Config) -> Self {
        SimSpawner::with_tape(scenario, config, SharedTape::new())
    }

    /// Use a caller-supplied tape, typically file-backed.
    pub fn with_tape(scenario: Scenario, config: &Config, tape: SharedTape) -> Self {
        SimSpawner {
            tape,
            scenario,
            settings: SimSettings {
                temporary_checkpoint_threshold: config.temporary_checkpoint_threshold(),
                always_save_temporary_checkpoints: config.always_save_temporary_checkpoints,
            },
            faults: Vec::new(),
            spawned_recording: 0,
            spawned_replaying: 0,
            next_pid: 1000,
        }
    }

    pub fn arm_fault(&mut self, fault: SimFault) {
        self.faults.push(fault);
    }

    pub fn tape(&self) -> SharedTape {
        self.tape.clone()
    }

    fn fault_for(&self, kind: ChildKind, spawn_index: usize) -> Option<&SimFault> {
        self.faults
            .iter()
            .find(|f| f.kind == kind && f.spawn_index == spawn_index)
    }
}

impl Spawner for SimSpawner {
    fn spawn(
        &mut self,
        kind: ChildKind,
        channel_id: u64,
        mut handler: ChannelHandler,
    ) -> Result<SpawnedChild, SessionError> {
        let (middleman_stream, child_stream) = UnixStream::pair()
            .map_err(|err| SessionError::Spawn(format!("socket pair: {err}")))?;
        let killer = child_stream
            .try_clone()
            .map_err(|err| SessionError::Spawn(format!("clone stream: {err}")))?;

        let spawn_index = match kind {
            ChildKind::Recording => {
                self.spawned_recording += 1;
                self.spawned_recording - 1
            }
            ChildKind::Replaying => {
                self.spawned_replaying += 1;
                self.spawned_replaying - 1
            }
        };
        let fault = self.fault_for(kind, spawn_index).cloned();
        let pid = self.next_pid;
        self.next_pid += 1;

        let channel = Channel::new(channel_id, middleman_stream, move |event| handler(event))?;

        let (tx, rx) = mpsc::channel();
        let child_channel = Channel::new(channel_id, child_stream, move |event| {
            let _ = tx.send(event);
        })?;
        let stop = Arc::new(AtomicBool::new(false));
        let engine = match kind {
            ChildKind::Recording => {
                ScriptedEngine::recording(self.tape.clone(), self.scenario.clone())
            }
            ChildKind::Replaying => ScriptedEngine::replaying(self.tape.clone()),
        };
        let options = ChildOptions {
            kind,
            navigation: NavigationSettings {
                is_recording: kind == ChildKind::Recording,
                temporary_checkpoint_threshold: self.settings.temporary_checkpoint_threshold,
                always_save_temporary_checkpoints: self.settings.always_save_temporary_checkpoints,
            },
            crash_at_checkpoint: fault.as_ref().and_then(|f| f.crash_at_checkpoint),
            hang_at_checkpoint: fault.as_ref().and_then(|f| f.hang_at_checkpoint),
            stop: Arc::clone(&stop),
        };

        thread::Builder::new()
            .name(format!("sim-child-{pid}"))
            .spawn(move || {
                let exit = ReplayChild::new(engine, child_channel, rx, options).run();
                debug!(pid, ?exit, "simulated child finished");
            })
            .map_err(|err| SessionError::Spawn(format!("spawn thread: {err}")))?;

        Ok(SpawnedChild {
            channel,
            handle: Box::new(SimChildHandle {
                pid,
                stop,
                stream: killer,
            }),
        })
    }
}
