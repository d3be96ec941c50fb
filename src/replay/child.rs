use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::bridge::{Debuggee, ProcessOutcome, ReplayServer};
use crate::protocol::{Channel, ChannelEvent, CheckpointId, Message, FIRST_CHECKPOINT, INVALID_CHECKPOINT};

use super::engine::{EngineEvent, ExecutionEngine};
use super::navigation::{LoggedRequest, Navigation, NavigationSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Recording,
    Replaying,
}

/// Construction-time knobs for a child loop. The crash/hang fields are
/// the intentional fault hooks used to exercise middleman recovery; they
/// only fire while intentional crashes are allowed, which the middleman
/// turns off after a restart.
pub struct ChildOptions {
    pub kind: ChildKind,
    pub navigation: NavigationSettings,
    pub crash_at_checkpoint: Option<CheckpointId>,
    pub hang_at_checkpoint: Option<CheckpointId>,
    pub stop: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Terminated,
    Disconnected,
    /// The child crashed on purpose (fault hook) or hit a fatal protocol
    /// error.
    Fatal,
}

enum Stop {
    Exit(ChildExit),
}

/// A child process main loop: receives middleman messages, drives the
/// navigation machine over the engine, and answers debugger requests.
/// Runs recording and replaying children alike; the difference is the
/// navigation settings and whether checkpoints can be restored.
pub struct ReplayChild<E: ExecutionEngine + Debuggee> {
    engine: E,
    channel: Channel,
    rx: Receiver<ChannelEvent>,
    nav: Navigation,
    server: ReplayServer<E::ObjectHandle>,
    kind: ChildKind,
    active: bool,
    allow_intentional_crashes: bool,
    crash_at_checkpoint: Option<CheckpointId>,
    hang_at_checkpoint: Option<CheckpointId>,
    stop: Arc<AtomicBool>,
}

impl<E: ExecutionEngine + Debuggee> ReplayChild<E> {
    pub fn new(
        mut engine: E,
        channel: Channel,
        rx: Receiver<ChannelEvent>,
        options: ChildOptions,
    ) -> Self {
        if options.kind == ChildKind::Replaying {
            // The first checkpoint is always kept: there must be somewhere
            // to rewind to.
            engine.set_save_checkpoint(FIRST_CHECKPOINT, true);
        }
        ReplayChild {
            engine,
            channel,
            rx,
            nav: Navigation::new(options.navigation),
            server: ReplayServer::new(),
            kind: options.kind,
            active: false,
            allow_intentional_crashes: true,
            crash_at_checkpoint: options.crash_at_checkpoint,
            hang_at_checkpoint: options.hang_at_checkpoint,
            stop: options.stop,
        }
    }

    /// Run until terminated or disconnected. The first thing sent is the
    /// primordial pause so the middleman knows the child is ready.
    pub fn run(mut self) -> ChildExit {
        if self
            .send(Message::HitCheckpoint {
                checkpoint: INVALID_CHECKPOINT,
                duration_us: 0,
            })
            .is_err()
        {
            return ChildExit::Disconnected;
        }
        loop {
            let event = match self.rx.recv() {
                Ok(event) => event,
                Err(_) => return ChildExit::Disconnected,
            };
            let msg = match event {
                ChannelEvent::Message(msg) => msg,
                ChannelEvent::Disconnected => return ChildExit::Disconnected,
            };
            if let Err(Stop::Exit(exit)) = self.handle(msg) {
                return exit;
            }
        }
    }

    fn handle(&mut self, msg: Message) -> Result<(), Stop> {
        match msg {
            Message::Introduction { parent_pid, .. } => {
                info!(parent_pid, kind = ?self.kind, "child introduced");
                Ok(())
            }
            Message::SetIsActive { active } => {
                self.active = active;
                Ok(())
            }
            Message::SetAllowIntentionalCrashes { allow } => {
                self.allow_intentional_crashes = allow;
                Ok(())
            }
            Message::SetSaveCheckpoint { checkpoint, save } => {
                if checkpoint <= self.engine.last_checkpoint() {
                    return self.fatal(&format!(
                        "save directive for checkpoint {checkpoint} already behind"
                    ));
                }
                self.engine.set_save_checkpoint(checkpoint, save);
                Ok(())
            }
            Message::SetBreakpoint { id, position } => {
                self.nav.set_breakpoint(id, position);
                Ok(())
            }
            Message::Resume { forward } => {
                self.server.reset_pause();
                let mut out = Vec::new();
                self.nav.resume(&mut self.engine, forward, &mut out);
                self.dispatch(out)?;
                self.drive()
            }
            Message::RestoreCheckpoint { checkpoint } => {
                self.server.reset_pause();
                let mut out = Vec::new();
                self.nav
                    .external_restore(&mut self.engine, checkpoint, &mut out);
                self.dispatch(out)
            }
            Message::DebuggerRequest { json } => self.handle_request(json),
            Message::FlushRecording => {
                if !self.engine.flush_recording() {
                    return self.fatal("recording flush failed");
                }
                self.send(Message::RecordingFlushed)
            }
            Message::CreateCheckpoint => {
                self.engine.request_checkpoint();
                Ok(())
            }
            Message::Terminate => Err(Stop::Exit(ChildExit::Terminated)),
            other => self.fatal(&format!("unexpected message {}", other.kind_str())),
        }
    }

    /// Run the engine until navigation pauses again.
    fn drive(&mut self) -> Result<(), Stop> {
        while self.nav.is_running() {
            // The only messages legal mid-run.
            while let Ok(ChannelEvent::Message(msg)) = self.rx.try_recv() {
                match msg {
                    Message::CreateCheckpoint => self.engine.request_checkpoint(),
                    Message::Terminate => return Err(Stop::Exit(ChildExit::Terminated)),
                    other => {
                        return self
                            .fatal(&format!("{} while running", other.kind_str()))
                    }
                }
            }
            let event = self.engine.run_to_next_event();
            if let EngineEvent::Checkpoint { id, .. } = &event {
                self.fault_hooks(*id)?;
            }
            let mut out = Vec::new();
            self.nav.on_event(&mut self.engine, event, &mut out);
            self.dispatch(out)?;
        }
        self.server.reset_pause();
        if self.active && self.nav.paused_at_breakpoint() {
            self.repaint()?;
        }
        Ok(())
    }

    fn fault_hooks(&mut self, checkpoint: CheckpointId) -> Result<(), Stop> {
        if !self.allow_intentional_crashes {
            return Ok(());
        }
        if self.crash_at_checkpoint == Some(checkpoint) {
            error!(checkpoint, "intentional crash");
            // Drop the channel without a word; the middleman sees the
            // disconnect as a fatal error.
            self.channel.shutdown();
            return Err(Stop::Exit(ChildExit::Fatal));
        }
        if self.hang_at_checkpoint == Some(checkpoint) {
            error!(checkpoint, "intentional hang");
            while !self.stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(5));
            }
            return Err(Stop::Exit(ChildExit::Fatal));
        }
        Ok(())
    }

    fn handle_request(&mut self, json: String) -> Result<(), Stop> {
        let allowed = self.nav.divergence_allowed(&self.engine);
        match self.server.process(&mut self.engine, allowed, &json) {
            ProcessOutcome::Response {
                json: response,
                diverged_now,
            } => {
                if diverged_now {
                    self.nav.mark_diverged();
                }
                if self.nav.paused_at_breakpoint() {
                    self.nav.log_request(LoggedRequest {
                        json,
                        response: response.clone(),
                        no_divergence: false,
                    });
                }
                self.send(Message::DebuggerResponse { json: response })
            }
            ProcessOutcome::UnhandledDivergence => self.recover_divergence(json),
        }
    }

    /// Rebuild the pause after an unhandled divergence: rewind to the
    /// pause point, replay the request log verbatim, and answer the
    /// triggering request without letting it diverge again.
    fn recover_divergence(&mut self, trigger: String) -> Result<(), Stop> {
        debug!("recovering from unhandled divergence");
        let Some(mut log) = self.nav.recover_from_divergence(&mut self.engine) else {
            return self.fatal("unhandled divergence outside a pause");
        };
        self.server.reset_pause();
        log.push(LoggedRequest {
            json: trigger,
            response: String::new(),
            no_divergence: true,
        });
        let last = log.len() - 1;
        for (i, entry) in log.into_iter().enumerate() {
            let allowed = !entry.no_divergence && self.nav.divergence_allowed(&self.engine);
            match self.server.process(&mut self.engine, allowed, &entry.json) {
                ProcessOutcome::Response {
                    json: response,
                    diverged_now,
                } => {
                    if diverged_now {
                        self.nav.mark_diverged();
                    }
                    if i < last && response != entry.response {
                        return self.fatal("replayed debugger response differs from original");
                    }
                    self.nav.log_request(LoggedRequest {
                        json: entry.json,
                        response: response.clone(),
                        no_divergence: entry.no_divergence,
                    });
                    if i == last {
                        self.send(Message::DebuggerResponse { json: response })?;
                    }
                }
                ProcessOutcome::UnhandledDivergence => {
                    return self.fatal("unhandled divergence while replaying request log");
                }
            }
        }
        Ok(())
    }

    fn repaint(&mut self) -> Result<(), Stop> {
        let pixels = self.engine.progress().to_le_bytes().to_vec();
        self.send(Message::Paint {
            width: pixels.len() as u32,
            height: 1,
            pixels,
        })
    }

    fn dispatch(&mut self, out: Vec<Message>) -> Result<(), Stop> {
        for msg in out {
            let fatal = matches!(msg, Message::FatalError { .. });
            self.send(msg)?;
            if fatal {
                return Err(Stop::Exit(ChildExit::Fatal));
            }
        }
        Ok(())
    }

    fn send(&self, msg: Message) -> Result<(), Stop> {
        self.channel
            .send(&msg)
            .map_err(|_| Stop::Exit(ChildExit::Disconnected))
    }

    fn fatal(&self, message: &str) -> Result<(), Stop> {
        error!(message, "child fatal error");
        let _ = self.channel.send(&Message::FatalError {
            message: message.to_string(),
        });
        Err(Stop::Exit(ChildExit::Fatal))
    }
}
