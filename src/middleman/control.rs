use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::bridge::{BridgeError, RequestTransport};
use crate::config::Config;
use crate::protocol::{
    BreakpointId, ChannelEvent, CheckpointId, Message, Position, FIRST_CHECKPOINT,
    INVALID_CHECKPOINT,
};
use crate::replay::ChildKind;

use super::child::{ChildId, ChildProcess, ChildRole};
use super::pending::PendingMessages;
use super::spawn::{ChannelHandler, Spawner};
use super::SessionError;

/// What the controller reports to the debugger embedding it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PausedAtCheckpoint { checkpoint: CheckpointId },
    PausedAtBreakpoint { breakpoints: Vec<BreakpointId> },
    PausedAtRecordingEndpoint,
    /// A rewind ran out of recording; execution sits at the first
    /// checkpoint.
    AtRecordingStart,
    Painted { width: u32, height: u32, pixels: Vec<u8> },
    ChildRestarted { child: ChildId, reason: String },
    FatalSessionError { message: String },
}

/// Index of the recording child; replaying children follow.
const RECORDING: ChildId = 0;

/// The controller: one thread's view of the whole session.
///
/// All decisions happen on the thread that calls into this type. Channel
/// receive threads only park messages in `pending`; the controller drains
/// them here, so children are spoken to strictly in turn.
pub struct NavigationController {
    config: Config,
    spawner: Box<dyn Spawner>,
    pending: Arc<PendingMessages>,
    children: Vec<ChildProcess>,
    active: ChildId,
    next_channel_id: u64,
    /// Set while a resume is outstanding; the direction decides what to
    /// do when the active child pauses at a checkpoint.
    running: Option<bool>,
    /// Set while the controller is synchronously driving children for
    /// its own purposes; suppresses event emission and auto-continue.
    driving: bool,
    /// An active-child pause that arrived mid-drive. It still owes the
    /// session a reaction (auto-continue or an event) and gets
    /// re-dispatched when the outermost drive ends.
    stalled_pause: Option<Message>,
    breakpoints: HashMap<BreakpointId, Position>,
    last_flush: Instant,
    flushed_checkpoint: CheckpointId,
    major_accum_us: u64,
    next_major_child: ChildId,
    events: VecDeque<SessionEvent>,
    response: Option<String>,
}

impl NavigationController {
    /// Launch the session: the recording child, and two replaying
    /// children when rewinding is enabled. Returns once every child has
    /// reported its primordial pause and been introduced.
    pub fn new(config: Config, spawner: Box<dyn Spawner>) -> Result<Self, SessionError> {
        let mut ctl = NavigationController {
            config,
            spawner,
            pending: Arc::new(PendingMessages::new()),
            children: Vec::new(),
            active: RECORDING,
            next_channel_id: 1,
            running: None,
            driving: false,
            stalled_pause: None,
            breakpoints: HashMap::new(),
            last_flush: Instant::now(),
            flushed_checkpoint: INVALID_CHECKPOINT,
            major_accum_us: 0,
            next_major_child: 1,
            events: VecDeque::new(),
            response: None,
        };
        ctl.spawn_child(ChildKind::Recording, ChildRole::Active)?;
        if ctl.config.rewinding_enabled {
            ctl.spawn_child(ChildKind::Replaying, ChildRole::Standby)?;
            ctl.spawn_child(ChildKind::Replaying, ChildRole::Standby)?;
        }
        for id in 0..ctl.children.len() {
            ctl.wait_until(id, |c| c.is_paused())?;
            let intro = ctl.children[id].intro_message();
            ctl.children[id].send(intro)?;
            let active = id == ctl.active;
            ctl.children[id].send(Message::SetIsActive { active })?;
        }
        info!(children = ctl.children.len(), "session started");
        Ok(ctl)
    }

    fn spawn_child(&mut self, kind: ChildKind, role: ChildRole) -> Result<ChildId, SessionError> {
        let id = self.children.len();
        let spawned = self.spawn_process(kind)?;
        let prefs = serde_json::to_value(&self.config).unwrap_or_default();
        self.children
            .push(ChildProcess::new(id, kind, role, spawned, prefs));
        Ok(id)
    }

    fn spawn_process(
        &mut self,
        kind: ChildKind,
    ) -> Result<super::spawn::SpawnedChild, SessionError> {
        let channel_id = self.next_channel_id;
        self.next_channel_id += 1;
        let pending = Arc::clone(&self.pending);
        let handler: ChannelHandler = Box::new(move |event| match event {
            ChannelEvent::Message(msg) => pending.push(channel_id, msg),
            // A vanished child looks exactly like one that reported a
            // fatal error; the restart path handles both.
            ChannelEvent::Disconnected => pending.push(
                channel_id,
                Message::FatalError {
                    message: "channel disconnected".into(),
                },
            ),
        });
        self.spawner.spawn(kind, channel_id, handler)
    }

    pub fn active_child(&self) -> ChildId {
        self.active
    }

    pub fn is_paused(&self) -> bool {
        self.running.is_none() && self.children[self.active].is_paused()
    }

    // ---- Debugger-facing operations ----------------------------------

    /// Continue execution. Backward resumes hand control to a replaying
    /// child; forward resumes run whatever child is active.
    pub fn resume(&mut self, forward: bool) -> Result<(), SessionError> {
        if forward {
            self.clear_obsolete_saves()?;
            if self.children[self.active].kind == ChildKind::Recording
                && self.last_flush.elapsed() >= self.config.flush_interval()
            {
                self.flush()?;
            }
            self.running = Some(true);
            self.children[self.active].send(Message::Resume { forward: true })?;
            return Ok(());
        }

        if !self.config.rewinding_enabled {
            return Err(SessionError::Protocol("rewinding is disabled".into()));
        }
        let target = self.children[self.active].rewind_target_checkpoint();
        if target == INVALID_CHECKPOINT {
            self.events.push_back(SessionEvent::AtRecordingStart);
            return Ok(());
        }
        self.flush()?;
        let responsible = self.responsible_child(target);
        if responsible != self.active {
            // Fill in checkpoint saves while the child is still idle;
            // once it takes over its position matters.
            self.ensure_saved_through(responsible, target)?;
            self.switch_active(responsible)?;
        }
        self.running = Some(false);
        self.children[self.active].send(Message::Resume { forward: false })?;
        Ok(())
    }

    /// Interrupt a running resume. Execution stops at the next
    /// checkpoint, created promptly for the purpose.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.running = None;
        if !self.children[self.active].is_paused() {
            self.children[self.active].send(Message::CreateCheckpoint)?;
            self.wait_until(self.active, |c| c.is_paused())?;
        }
        if self.children[self.active].kind == ChildKind::Recording {
            self.flush()?;
            // Inspection needs a child that can diverge and rewind. Hand
            // the pause to the responsible replaying child, saved through
            // the pause point so restores around it are cheap.
            let pause_point = self.children[self.active].last_checkpoint();
            if self.config.rewinding_enabled
                && self.children[self.active].paused_at_checkpoint()
                && pause_point != INVALID_CHECKPOINT
            {
                let responsible = self.responsible_child(pause_point);
                self.ensure_saved_through(responsible, pause_point)?;
                self.switch_active(responsible)?;
            }
        } else {
            // Fill intermediate saves around the pause point now, while
            // the standby is idle, so a later rewind is a plain restore.
            let target = self.children[self.active].rewind_target_checkpoint();
            if target != INVALID_CHECKPOINT {
                let responsible = self.responsible_child(target);
                if responsible != self.active {
                    self.ensure_saved_through(responsible, target)?;
                }
            }
        }
        let paused = self.children[self.active].paused_message().cloned();
        if let Some(Message::HitCheckpoint { checkpoint, .. }) = paused {
            self.events
                .push_back(SessionEvent::PausedAtCheckpoint { checkpoint });
        }
        Ok(())
    }

    /// Install or clear a breakpoint on the active child.
    pub fn set_breakpoint(
        &mut self,
        id: BreakpointId,
        position: Option<Position>,
    ) -> Result<(), SessionError> {
        match &position {
            Some(position) => {
                self.breakpoints.insert(id, position.clone());
            }
            None => {
                self.breakpoints.remove(&id);
            }
        }
        self.children[self.active].send(Message::SetBreakpoint { id, position })
    }

    /// Round-trip one debugger request to the paused active child.
    pub fn debugger_request(&mut self, json: &str) -> Result<String, SessionError> {
        self.response = None;
        self.children[self.active].send(Message::DebuggerRequest {
            json: json.to_string(),
        })?;
        let was_driving = std::mem::replace(&mut self.driving, true);
        let result = self.wait_for_response();
        self.driving = was_driving;
        let response = result?;
        self.dispatch_stalled(was_driving)?;
        Ok(response)
    }

    fn wait_for_response(&mut self) -> Result<String, SessionError> {
        loop {
            if let Some(response) = self.response.take() {
                return Ok(response);
            }
            let child = self.active;
            let deadline = self.children[child].last_heard() + self.config.hang_timeout();
            match self.pending.pop_or_wait_until(deadline) {
                Some((channel, msg)) => self.route(channel, msg)?,
                None => self.handle_wait_timeout(child)?,
            }
        }
    }

    /// Drain pending messages without blocking.
    pub fn pump(&mut self) -> Result<(), SessionError> {
        while let Some((channel, msg)) = self.pending.pop() {
            self.route(channel, msg)?;
        }
        Ok(())
    }

    pub fn poll_event(&mut self) -> Result<Option<SessionEvent>, SessionError> {
        self.pump()?;
        Ok(self.events.pop_front())
    }

    /// Block until an event is available or `timeout` passes.
    pub fn wait_event(&mut self, timeout: Duration) -> Result<Option<SessionEvent>, SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.poll_event()? {
                return Ok(Some(event));
            }
            let child = self.active;
            let hang_deadline = self.children[child].last_heard() + self.config.hang_timeout();
            let wait_until = if self.running.is_some() && hang_deadline < deadline {
                hang_deadline
            } else {
                deadline
            };
            match self.pending.pop_or_wait_until(wait_until) {
                Some((channel, msg)) => self.route(channel, msg)?,
                None => {
                    if self.running.is_some() && Instant::now() >= hang_deadline {
                        self.handle_wait_timeout(child)?;
                    }
                    if Instant::now() >= deadline {
                        return Ok(self.events.pop_front());
                    }
                }
            }
        }
    }

    /// Terminate every child. The session is unusable afterwards.
    pub fn shutdown(&mut self) {
        for child in &mut self.children {
            let _ = child.send(Message::Terminate);
        }
        for child in &mut self.children {
            child.kill();
        }
    }

    // ---- Message routing ---------------------------------------------

    fn route(&mut self, channel: u64, msg: Message) -> Result<(), SessionError> {
        let Some(child) = self
            .children
            .iter()
            .position(|c| c.channel_id() == channel)
        else {
            // A message from a channel belonging to a previous life of
            // some restarted child.
            trace!(channel, kind = msg.kind_str(), "dropping stale message");
            return Ok(());
        };

        if let Message::FatalError { message } = &msg {
            warn!(child, %message, "child failed");
            let reason = message.clone();
            return self.attempt_restart(child, &reason);
        }

        if self.children[child].is_recovering() {
            // Responses replayed during recovery are the real answers to
            // requests whose originals were lost with the old process.
            if let Message::DebuggerResponse { json } = &msg {
                if child == self.active {
                    self.response = Some(json.clone());
                }
            }
            return self.children[child].on_recovery_message(msg);
        }

        self.children[child].note_incoming(&msg);
        self.children[child].flush_deferred_saves()?;

        if let Message::DebuggerResponse { json } = &msg {
            if child == self.active {
                self.response = Some(json.clone());
            }
            return Ok(());
        }

        match self.children[child].role {
            ChildRole::Active => self.handle_active(child, msg),
            ChildRole::Standby => self.handle_standby(child, msg),
            ChildRole::Inert => {
                // The benched recording child repaints and acknowledges
                // flushes; anything else is a violation.
                match msg {
                    Message::Paint { .. } | Message::RecordingFlushed => Ok(()),
                    other => Err(SessionError::Protocol(format!(
                        "inert child {child} sent {}",
                        other.kind_str()
                    ))),
                }
            }
        }
    }

    fn handle_active(&mut self, child: ChildId, msg: Message) -> Result<(), SessionError> {
        match msg {
            Message::HitCheckpoint {
                checkpoint,
                duration_us,
            } => {
                if checkpoint == INVALID_CHECKPOINT {
                    return Ok(());
                }
                if self.driving {
                    self.stalled_pause = Some(Message::HitCheckpoint {
                        checkpoint,
                        duration_us,
                    });
                    return Ok(());
                }
                if self.children[child].kind == ChildKind::Recording {
                    self.schedule_major(checkpoint, duration_us)?;
                }
                match self.running {
                    Some(true) => {
                        if self.children[child].kind == ChildKind::Recording
                            && self.last_flush.elapsed() >= self.config.flush_interval()
                        {
                            self.flush()?;
                        }
                        self.children[self.active].send(Message::Resume { forward: true })
                    }
                    Some(false) => self.continue_backward(checkpoint),
                    None => {
                        self.events
                            .push_back(SessionEvent::PausedAtCheckpoint { checkpoint });
                        Ok(())
                    }
                }
            }
            Message::HitBreakpoint { breakpoints } => {
                if self.driving {
                    self.stalled_pause = Some(Message::HitBreakpoint { breakpoints });
                    return Ok(());
                }
                self.running = None;
                self.events
                    .push_back(SessionEvent::PausedAtBreakpoint { breakpoints });
                Ok(())
            }
            Message::HitRecordingEndpoint => {
                if self.driving {
                    self.stalled_pause = Some(Message::HitRecordingEndpoint);
                    return Ok(());
                }
                if self.running == Some(true)
                    && self.children[child].kind == ChildKind::Replaying
                {
                    // Replay caught up with everything flushed; live
                    // recording takes over again.
                    self.switch_to_recording()?;
                    return self.children[self.active].send(Message::Resume { forward: true });
                }
                self.running = None;
                self.events.push_back(SessionEvent::PausedAtRecordingEndpoint);
                Ok(())
            }
            Message::Paint {
                width,
                height,
                pixels,
            } => {
                self.events.push_back(SessionEvent::Painted {
                    width,
                    height,
                    pixels,
                });
                Ok(())
            }
            Message::RecordingFlushed => Ok(()),
            other => Err(SessionError::Protocol(format!(
                "active child {child} sent {}",
                other.kind_str()
            ))),
        }
    }

    fn handle_standby(&mut self, child: ChildId, msg: Message) -> Result<(), SessionError> {
        match msg {
            Message::HitCheckpoint { .. } | Message::HitRecordingEndpoint => {
                if !self.driving {
                    self.poke(child)?;
                }
                Ok(())
            }
            Message::Paint { .. } => Ok(()),
            other => Err(SessionError::Protocol(format!(
                "standby child {child} sent {}",
                other.kind_str()
            ))),
        }
    }

    /// Keep a standby shadowing the flushed frontier so its assigned
    /// major checkpoints get saved close to when they are created.
    fn poke(&mut self, child: ChildId) -> Result<(), SessionError> {
        let c = &self.children[child];
        if !c.is_paused() || c.is_recovering() || c.pause_needed {
            return Ok(());
        }
        if c.last_checkpoint() < self.flushed_checkpoint {
            self.children[child].send(Message::Resume { forward: true })?;
        }
        Ok(())
    }

    fn continue_backward(&mut self, checkpoint: CheckpointId) -> Result<(), SessionError> {
        if checkpoint <= FIRST_CHECKPOINT {
            self.running = None;
            self.events.push_back(SessionEvent::AtRecordingStart);
            return Ok(());
        }
        if self.breakpoints.is_empty() {
            // A plain rewind stops one checkpoint back.
            self.running = None;
            self.events
                .push_back(SessionEvent::PausedAtCheckpoint { checkpoint });
            return Ok(());
        }
        // No hit in the span just scanned; keep looking in the one below.
        self.children[self.active].send(Message::Resume { forward: false })
    }

    /// Intermediate saves filled in around a pause point serve rewinds
    /// from that pause; once execution moves on they are dead weight.
    /// Drop every unsatisfied directive except majors and the first
    /// checkpoint, which anchor future rewinds.
    fn clear_obsolete_saves(&mut self) -> Result<(), SessionError> {
        for id in 0..self.children.len() {
            if self.children[id].kind != ChildKind::Replaying {
                continue;
            }
            for checkpoint in self.children[id].pending_save_directives() {
                if checkpoint != FIRST_CHECKPOINT && !self.children[id].is_major(checkpoint) {
                    self.children[id].direct_save(checkpoint, false)?;
                }
            }
        }
        Ok(())
    }

    // ---- Checkpoint scheduling and flushing --------------------------

    /// Accumulate non-idle execution time and promote a checkpoint to
    /// major once enough has passed, alternating between the replaying
    /// children so each carries every other span.
    fn schedule_major(
        &mut self,
        checkpoint: CheckpointId,
        duration_us: u64,
    ) -> Result<(), SessionError> {
        if !self.config.rewinding_enabled {
            return Ok(());
        }
        self.major_accum_us += duration_us;
        if self.major_accum_us < self.config.major_checkpoint_interval().as_micros() as u64 {
            return Ok(());
        }
        self.major_accum_us = 0;
        let target = self.next_major_child;
        self.next_major_child = if target == 1 { 2 } else { 1 };
        self.children[target].mark_major(checkpoint + 1)
    }

    /// Flush the recording so replaying children can see everything up
    /// to the recording child's current position. Standbys are parked
    /// first; resuming them into a tape that is mid-flush is not safe.
    fn flush(&mut self) -> Result<(), SessionError> {
        let recording = &self.children[RECORDING];
        if !recording.is_paused() {
            return Err(SessionError::Protocol(
                "flush requires a paused recording child".into(),
            ));
        }
        if recording.last_checkpoint() == self.flushed_checkpoint {
            self.last_flush = Instant::now();
            return Ok(());
        }
        let was_driving = std::mem::replace(&mut self.driving, true);
        let result = self.flush_inner();
        self.driving = was_driving;
        result?;
        self.dispatch_stalled(was_driving)
    }

    fn flush_inner(&mut self) -> Result<(), SessionError> {
        for id in self.standby_ids() {
            self.children[id].pause_needed = true;
        }
        for id in self.standby_ids() {
            self.wait_until(id, |c| c.is_paused())?;
        }
        self.children[RECORDING].send(Message::FlushRecording)?;
        self.wait_until(RECORDING, |c| c.is_paused())?;
        self.flushed_checkpoint = self.children[RECORDING].last_checkpoint();
        self.last_flush = Instant::now();
        debug!(checkpoint = self.flushed_checkpoint, "recording flushed");
        for id in self.standby_ids() {
            self.children[id].pause_needed = false;
            self.poke_after_drive(id)?;
        }
        Ok(())
    }

    fn poke_after_drive(&mut self, child: ChildId) -> Result<(), SessionError> {
        let c = &self.children[child];
        if c.is_paused()
            && !c.is_recovering()
            && !c.pause_needed
            && c.last_checkpoint() < self.flushed_checkpoint
        {
            self.children[child].send(Message::Resume { forward: true })?;
        }
        Ok(())
    }

    fn standby_ids(&self) -> Vec<ChildId> {
        self.children
            .iter()
            .filter(|c| c.role == ChildRole::Standby && c.kind == ChildKind::Replaying)
            .map(|c| c.id)
            .collect()
    }

    // ---- Role switching ----------------------------------------------

    /// The replaying child responsible for checkpoints around `target`:
    /// the one holding the nearest major checkpoint at or below it.
    fn responsible_child(&self, target: CheckpointId) -> ChildId {
        let mut best: ChildId = 1;
        let mut best_base = INVALID_CHECKPOINT;
        for child in &self.children {
            if child.kind != ChildKind::Replaying {
                continue;
            }
            let base = child.major_base(target);
            if child.id == self.active && child.role == ChildRole::Active {
                // Staying put avoids a recovery; prefer the incumbent on
                // ties.
                if base >= best_base {
                    return child.id;
                }
            }
            if base > best_base || best_base == INVALID_CHECKPOINT {
                best = child.id;
                best_base = base;
            }
        }
        best
    }

    /// Drive a standby until every checkpoint from its responsible major
    /// through `target` is saved.
    fn ensure_saved_through(
        &mut self,
        child: ChildId,
        target: CheckpointId,
    ) -> Result<(), SessionError> {
        let was_driving = std::mem::replace(&mut self.driving, true);
        let result = self.ensure_saved_inner(child, target);
        self.driving = was_driving;
        result?;
        self.dispatch_stalled(was_driving)
    }

    fn ensure_saved_inner(
        &mut self,
        child: ChildId,
        target: CheckpointId,
    ) -> Result<(), SessionError> {
        let base = self.children[child].major_base(target);
        for cp in base..=target {
            if !self.children[child].has_saved(cp) && !self.children[child].should_save(cp) {
                self.children[child].direct_save(cp, true)?;
            }
        }
        loop {
            self.wait_until(child, |c| c.is_paused())?;
            let c = &self.children[child];
            let Some(first_unsaved) = (base..=target).find(|cp| !c.has_saved(*cp)) else {
                return Ok(());
            };
            if c.last_checkpoint() >= first_unsaved {
                let restore = c
                    .latest_saved_at_or_before(first_unsaved)
                    .unwrap_or(FIRST_CHECKPOINT);
                self.children[child].send(Message::RestoreCheckpoint { checkpoint: restore })?;
            } else {
                self.children[child].send(Message::Resume { forward: true })?;
            }
        }
    }

    /// Hand the active role to a replaying child, reproducing the old
    /// active child's exact pause state on it first.
    fn switch_active(&mut self, new: ChildId) -> Result<(), SessionError> {
        let was_driving = std::mem::replace(&mut self.driving, true);
        let result = self.switch_active_inner(new);
        self.driving = was_driving;
        result?;
        self.dispatch_stalled(was_driving)
    }

    fn switch_active_inner(&mut self, new: ChildId) -> Result<(), SessionError> {
        debug!(from = self.active, to = new, "switching active child");
        let snapshot = self.children[self.active].snapshot();
        self.wait_until(new, |c| c.is_paused())?;
        self.children[new].begin_recover(snapshot, false)?;
        self.wait_until(new, |c| !c.is_recovering())?;

        let old = self.active;
        self.children[old].send(Message::SetIsActive { active: false })?;
        if self.children[old].kind == ChildKind::Recording {
            self.children[old].role = ChildRole::Inert;
        } else {
            for id in self.children[old].installed_breakpoints() {
                self.children[old].send(Message::SetBreakpoint { id, position: None })?;
            }
            self.children[old].role = ChildRole::Standby;
        }
        self.children[new].send(Message::SetIsActive { active: true })?;
        self.children[new].role = ChildRole::Active;
        self.active = new;
        Ok(())
    }

    /// Hand control back to the recording child after replay caught up
    /// with the flushed endpoint.
    fn switch_to_recording(&mut self) -> Result<(), SessionError> {
        debug!(from = self.active, "switching back to recording child");
        let old = self.active;
        // The recording child cannot restore, so instead of a recovery it
        // gets its breakpoints reconciled in place.
        let installed = self.children[RECORDING].installed_breakpoints();
        for id in installed {
            if !self.breakpoints.contains_key(&id) {
                self.children[RECORDING].send(Message::SetBreakpoint { id, position: None })?;
            }
        }
        for (id, position) in self.breakpoints.clone() {
            self.children[RECORDING].send(Message::SetBreakpoint {
                id,
                position: Some(position),
            })?;
        }
        self.children[old].send(Message::SetIsActive { active: false })?;
        for id in self.children[old].installed_breakpoints() {
            self.children[old].send(Message::SetBreakpoint { id, position: None })?;
        }
        self.children[old].role = ChildRole::Standby;
        self.children[RECORDING].send(Message::SetIsActive { active: true })?;
        self.children[RECORDING].role = ChildRole::Active;
        self.active = RECORDING;
        Ok(())
    }

    // ---- Waiting, hangs, and restarts --------------------------------

    fn wait_until(
        &mut self,
        child: ChildId,
        pred: impl Fn(&ChildProcess) -> bool,
    ) -> Result<(), SessionError> {
        let was_driving = std::mem::replace(&mut self.driving, true);
        let result = self.wait_until_inner(child, pred);
        self.driving = was_driving;
        result?;
        self.dispatch_stalled(was_driving)
    }

    /// Once the outermost drive is over, react to a pause the active
    /// child reported mid-drive. With a resume outstanding the pause is
    /// an obligation the session would otherwise sit on forever; without
    /// one the pause's initiator handles it directly.
    fn dispatch_stalled(&mut self, still_driving: bool) -> Result<(), SessionError> {
        if still_driving {
            return Ok(());
        }
        let Some(msg) = self.stalled_pause.take() else {
            return Ok(());
        };
        if self.running.is_some() {
            self.handle_active(self.active, msg)?;
        }
        Ok(())
    }

    fn wait_until_inner(
        &mut self,
        child: ChildId,
        pred: impl Fn(&ChildProcess) -> bool,
    ) -> Result<(), SessionError> {
        loop {
            if pred(&self.children[child]) {
                return Ok(());
            }
            let deadline = self.children[child].last_heard() + self.config.hang_timeout();
            match self.pending.pop_or_wait_until(deadline) {
                Some((channel, msg)) => self.route(channel, msg)?,
                None => self.handle_wait_timeout(child)?,
            }
        }
    }

    fn handle_wait_timeout(&mut self, child: ChildId) -> Result<(), SessionError> {
        let c = &self.children[child];
        if c.is_paused() && !c.is_recovering() {
            // Paused children are allowed to be silent; this wait is
            // stuck for a different reason.
            return Err(SessionError::Protocol(format!(
                "wait on paused child {child} made no progress"
            )));
        }
        warn!(child, "child hung");
        self.attempt_restart(child, "hang")
    }

    /// Kill a misbehaving replaying child, spawn a replacement, and walk
    /// it back to the dead child's state.
    fn attempt_restart(&mut self, child: ChildId, reason: &str) -> Result<(), SessionError> {
        if self.children[child].kind == ChildKind::Recording {
            let message = format!("recording child failed: {reason}");
            self.events
                .push_back(SessionEvent::FatalSessionError { message: message.clone() });
            return Err(SessionError::RecordingChildLost(message));
        }
        if self.children[child].restarts >= self.config.max_restarts {
            self.events.push_back(SessionEvent::FatalSessionError {
                message: format!("child {child} failed too many times: {reason}"),
            });
            return Err(SessionError::RestartsExhausted { child });
        }
        info!(child, reason, "restarting child");

        if child == self.active {
            // Recovery rebuilds the active child's pause; anything stashed
            // from its old life must not be replayed on top of it.
            self.stalled_pause = None;
        }
        let snapshot = self.children[child].snapshot();
        self.children[child].kill();
        let spawned = self.spawn_process(ChildKind::Replaying)?;
        self.children[child].adopt_respawn(spawned);

        let was_driving = std::mem::replace(&mut self.driving, true);
        let result: Result<(), SessionError> = (|| {
            self.wait_until(child, |c| c.is_paused())?;
            self.children[child].replay_handshake(&snapshot)?;
            self.children[child].begin_recover(snapshot, child == self.active)?;
            self.wait_until(child, |c| !c.is_recovering())?;
            if child == self.active {
                if let Some(forward) = self.running {
                    if self.children[child].is_paused() {
                        self.children[child].send(Message::Resume { forward })?;
                    }
                }
            }
            Ok(())
        })();
        self.driving = was_driving;
        result?;

        self.events.push_back(SessionEvent::ChildRestarted {
            child,
            reason: reason.to_string(),
        });
        self.dispatch_stalled(was_driving)
    }
}

impl RequestTransport for NavigationController {
    fn request(&mut self, json: &str) -> Result<String, BridgeError> {
        self.debugger_request(json)
            .map_err(|err| BridgeError::Transport(err.to_string()))
    }
}
