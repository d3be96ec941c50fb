use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, warn};

use crate::protocol::{CheckpointId, Message, FIRST_CHECKPOINT, INVALID_CHECKPOINT};
use crate::replay::ChildKind;

use super::spawn::SpawnedChild;
use super::SessionError;

pub type ChildId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRole {
    /// Serving the debugger; its messages drive the session.
    Active,
    /// Idle until poked; fills in checkpoint saves and shadows the
    /// recording frontier.
    Standby,
    /// Benched; must stay silent.
    Inert,
}

/// Everything needed to rebuild a child's state in another process: the
/// bookkeeping snapshot taken before a restart or role switch.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub paused: bool,
    pub paused_message: Option<Message>,
    pub last_checkpoint: CheckpointId,
    pub messages: Vec<Message>,
    pub should_save: BTreeSet<CheckpointId>,
    pub saved: BTreeSet<CheckpointId>,
    pub major_checkpoints: BTreeSet<CheckpointId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryStage {
    /// Running or restoring until the child sits paused at the target's
    /// last checkpoint.
    ReachingCheckpoint,
    /// Replaying the target's message log.
    PlayingMessages,
}

#[derive(Debug)]
struct Recovery {
    stage: RecoveryStage,
    target: Snapshot,
    next_message: usize,
    /// The checkpoint the child is actually at while recovering; the
    /// public bookkeeping already shows the target state.
    actual_checkpoint: CheckpointId,
    /// The pause message the child actually produced last, checked
    /// against the target when the log runs out.
    actual_pause: Option<Message>,
}

/// Middleman-side record of one child process.
///
/// Tracks pause state, the behavior-affecting messages sent since the
/// last checkpoint (the crash-recovery log), checkpoint save directives,
/// and drives the three-stage recovery protocol when asked.
pub struct ChildProcess {
    pub id: ChildId,
    pub kind: ChildKind,
    pub role: ChildRole,
    spawned: SpawnedChild,
    paused: bool,
    paused_message: Option<Message>,
    last_checkpoint: CheckpointId,
    messages: Vec<Message>,
    should_save: BTreeSet<CheckpointId>,
    /// Directives the living process actually holds. A directive in
    /// `should_save` whose delivery is still deferred is absent here, so
    /// hitting its checkpoint does not count as a save.
    sent_saves: BTreeSet<CheckpointId>,
    saved: BTreeSet<CheckpointId>,
    major_checkpoints: BTreeSet<CheckpointId>,
    deferred_saves: Vec<(CheckpointId, bool)>,
    /// While set, pokes leave the child paused (flush synchronization).
    pub pause_needed: bool,
    pub restarts: u32,
    recovery: Option<Recovery>,
    last_heard: Instant,
    intro: Message,
}

impl ChildProcess {
    pub fn new(
        id: ChildId,
        kind: ChildKind,
        role: ChildRole,
        spawned: SpawnedChild,
        prefs: serde_json::Value,
    ) -> Self {
        let mut should_save = BTreeSet::new();
        if kind == ChildKind::Replaying {
            // Replaying children keep the first checkpoint by convention,
            // with no directive on the wire.
            should_save.insert(FIRST_CHECKPOINT);
        }
        let sent_saves = should_save.clone();
        ChildProcess {
            id,
            kind,
            role,
            spawned,
            paused: false,
            paused_message: None,
            last_checkpoint: INVALID_CHECKPOINT,
            messages: Vec::new(),
            should_save,
            sent_saves,
            saved: BTreeSet::new(),
            major_checkpoints: BTreeSet::new(),
            deferred_saves: Vec::new(),
            pause_needed: false,
            restarts: 0,
            recovery: None,
            last_heard: Instant::now(),
            intro: Message::Introduction {
                parent_pid: std::process::id(),
                prefs,
                argv: Vec::new(),
            },
        }
    }

    pub fn channel_id(&self) -> u64 {
        self.spawned.channel.id()
    }

    pub fn pid(&self) -> u32 {
        self.spawned.handle.pid()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery.is_some()
    }

    pub fn last_heard(&self) -> Instant {
        self.last_heard
    }

    pub fn last_checkpoint(&self) -> CheckpointId {
        self.last_checkpoint
    }

    pub fn paused_message(&self) -> Option<&Message> {
        self.paused_message.as_ref()
    }

    pub fn paused_at_checkpoint(&self) -> bool {
        matches!(self.paused_message, Some(Message::HitCheckpoint { .. }))
    }

    pub fn intro_message(&self) -> Message {
        self.intro.clone()
    }

    /// The checkpoint a rewind from the current pause point heads for.
    /// Invalid when paused at the very start of the recording.
    pub fn rewind_target_checkpoint(&self) -> CheckpointId {
        if self.paused_at_checkpoint() {
            self.last_checkpoint.saturating_sub(1)
        } else {
            self.last_checkpoint
        }
    }

    pub fn has_saved(&self, checkpoint: CheckpointId) -> bool {
        self.saved.contains(&checkpoint)
    }

    pub fn should_save(&self, checkpoint: CheckpointId) -> bool {
        self.should_save.contains(&checkpoint)
    }

    pub fn latest_saved_at_or_before(&self, checkpoint: CheckpointId) -> Option<CheckpointId> {
        self.saved.range(..=checkpoint).next_back().copied()
    }

    pub fn is_major(&self, checkpoint: CheckpointId) -> bool {
        self.major_checkpoints.contains(&checkpoint)
    }

    /// The greatest major checkpoint at or below `checkpoint`, falling
    /// back to the first checkpoint.
    pub fn major_base(&self, checkpoint: CheckpointId) -> CheckpointId {
        self.major_checkpoints
            .range(..=checkpoint)
            .next_back()
            .copied()
            .unwrap_or(FIRST_CHECKPOINT)
    }

    /// Breakpoint ids this child currently has installed, per its
    /// recovery log.
    pub fn installed_breakpoints(&self) -> Vec<crate::protocol::BreakpointId> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::SetBreakpoint {
                    id,
                    position: Some(_),
                } => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Save directives not yet satisfied, for clearing when they become
    /// obsolete.
    pub fn pending_save_directives(&self) -> Vec<CheckpointId> {
        self.should_save
            .iter()
            .copied()
            .filter(|cp| !self.saved.contains(cp))
            .collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            paused: self.paused,
            paused_message: self.paused_message.clone(),
            last_checkpoint: self.last_checkpoint,
            messages: self.messages.clone(),
            should_save: self.should_save.clone(),
            saved: self.saved.clone(),
            major_checkpoints: self.major_checkpoints.clone(),
        }
    }

    /// Send with full protocol bookkeeping. Except for the two always-
    /// legal messages, sending requires the child to be paused.
    pub fn send(&mut self, msg: Message) -> Result<(), SessionError> {
        if !self.paused && !msg.can_send_while_unpaused() {
            return Err(SessionError::Protocol(format!(
                "{} sent to unpaused child {}",
                msg.kind_str(),
                self.id
            )));
        }
        if msg.affects_behavior() {
            self.record_message(&msg);
        }
        match &msg {
            Message::Resume { .. } | Message::RestoreCheckpoint { .. } => {
                self.paused = false;
                self.paused_message = None;
            }
            // These unpause the child but it returns to the same pause
            // point, so the pause message stays meaningful.
            Message::DebuggerRequest { .. } | Message::FlushRecording => {
                self.paused = false;
            }
            Message::SetSaveCheckpoint { checkpoint, save } => {
                if *save {
                    self.should_save.insert(*checkpoint);
                    self.sent_saves.insert(*checkpoint);
                } else {
                    self.should_save.remove(checkpoint);
                    self.sent_saves.remove(checkpoint);
                }
            }
            _ => {}
        }
        self.last_heard = Instant::now();
        self.spawned.channel.send(&msg)?;
        Ok(())
    }

    /// Send without pause bookkeeping; used while driving recovery, where
    /// the public state already shows the target. Still counts as hearing
    /// from the child for hang purposes: the silence clock measures time
    /// since the last interaction in either direction.
    fn send_raw(&mut self, msg: &Message) -> Result<(), SessionError> {
        self.last_heard = Instant::now();
        self.spawned.channel.send(msg)?;
        Ok(())
    }

    fn record_message(&mut self, msg: &Message) {
        if let Message::SetBreakpoint { id, position } = msg {
            self.messages.retain(
                |m| !matches!(m, Message::SetBreakpoint { id: prior, .. } if prior == id),
            );
            // A set-then-clear pair cancels out; recovery never replays it.
            if position.is_none() {
                return;
            }
        }
        self.messages.push(msg.clone());
    }

    /// Update bookkeeping for a message received outside recovery.
    pub fn note_incoming(&mut self, msg: &Message) {
        self.last_heard = Instant::now();
        match msg {
            Message::HitCheckpoint { checkpoint, .. } => {
                self.paused = true;
                self.paused_message = Some(msg.clone());
                if *checkpoint != INVALID_CHECKPOINT {
                    self.last_checkpoint = *checkpoint;
                    if self.sent_saves.contains(checkpoint) {
                        self.saved.insert(*checkpoint);
                    }
                    // The checkpoint is the new recovery baseline; only
                    // breakpoint state carries across it.
                    self.messages
                        .retain(|m| matches!(m, Message::SetBreakpoint { .. }));
                }
            }
            Message::HitBreakpoint { .. } | Message::HitRecordingEndpoint => {
                self.paused = true;
                self.paused_message = Some(msg.clone());
            }
            Message::DebuggerResponse { .. } | Message::RecordingFlushed => {
                self.paused = true;
            }
            _ => {}
        }
    }

    /// Queue or deliver a save directive. Children only accept directives
    /// for checkpoints ahead of them, so anything else waits: for the next
    /// pause, or for a restore that puts the checkpoint ahead again.
    pub fn direct_save(&mut self, checkpoint: CheckpointId, save: bool) -> Result<(), SessionError> {
        if save {
            self.should_save.insert(checkpoint);
        } else {
            self.should_save.remove(&checkpoint);
        }
        if self.paused && !self.is_recovering() && checkpoint > self.last_checkpoint {
            if save {
                self.sent_saves.insert(checkpoint);
            } else {
                self.sent_saves.remove(&checkpoint);
            }
            self.send_raw(&Message::SetSaveCheckpoint { checkpoint, save })
        } else {
            self.deferred_saves.push((checkpoint, save));
            Ok(())
        }
    }

    pub fn mark_major(&mut self, checkpoint: CheckpointId) -> Result<(), SessionError> {
        debug!(child = self.id, checkpoint, "assigned major checkpoint");
        self.major_checkpoints.insert(checkpoint);
        self.direct_save(checkpoint, true)
    }

    /// Deliver deferred save directives that are now ahead of the child;
    /// call when the child pauses. Directives still behind it stay queued
    /// until a restore moves the child below them.
    pub fn flush_deferred_saves(&mut self) -> Result<(), SessionError> {
        if !self.paused || self.is_recovering() {
            return Ok(());
        }
        let mut still_behind = Vec::new();
        for (checkpoint, save) in std::mem::take(&mut self.deferred_saves) {
            if checkpoint > self.last_checkpoint {
                if save {
                    self.sent_saves.insert(checkpoint);
                } else {
                    self.sent_saves.remove(&checkpoint);
                }
                self.send_raw(&Message::SetSaveCheckpoint { checkpoint, save })?;
            } else {
                still_behind.push((checkpoint, save));
            }
        }
        self.deferred_saves = still_behind;
        Ok(())
    }

    /// Forcibly stop the child process. The record keeps its bookkeeping
    /// so a snapshot can still be taken.
    pub fn kill(&mut self) {
        self.spawned.handle.kill();
    }

    /// Replace the dead process with a fresh one. Bookkeeping resets to
    /// the primordial state; the caller recovers from a snapshot after
    /// the new child's first pause.
    pub fn adopt_respawn(&mut self, spawned: SpawnedChild) {
        self.spawned = spawned;
        self.paused = false;
        self.paused_message = None;
        self.last_checkpoint = INVALID_CHECKPOINT;
        self.messages.clear();
        self.should_save.clear();
        self.sent_saves.clear();
        if self.kind == ChildKind::Replaying {
            self.should_save.insert(FIRST_CHECKPOINT);
            self.sent_saves.insert(FIRST_CHECKPOINT);
        }
        self.saved.clear();
        self.major_checkpoints.clear();
        self.deferred_saves.clear();
        self.recovery = None;
        self.restarts += 1;
        self.last_heard = Instant::now();
    }

    /// Re-send the handshake a fresh process needs before recovery: its
    /// introduction, the crash-hook disarm, and every save directive. The
    /// directives and major assignments from the old life come back too;
    /// the saved set stays empty because the new process holds nothing.
    pub fn replay_handshake(&mut self, snapshot: &Snapshot) -> Result<(), SessionError> {
        let intro = self.intro.clone();
        self.send_raw(&intro)?;
        self.send_raw(&Message::SetAllowIntentionalCrashes { allow: false })?;
        self.should_save.extend(snapshot.should_save.iter().copied());
        self.major_checkpoints = snapshot.major_checkpoints.clone();
        let directives = self.should_save.clone();
        for checkpoint in &directives {
            self.send_raw(&Message::SetSaveCheckpoint {
                checkpoint: *checkpoint,
                save: true,
            })?;
        }
        self.sent_saves = directives;
        Ok(())
    }

    /// Begin driving this (paused) child to `target`'s state. The public
    /// bookkeeping immediately shows the target; `on_recovery_message`
    /// consumes child messages until recovery completes.
    pub fn begin_recover(&mut self, target: Snapshot, active: bool) -> Result<(), SessionError> {
        assert!(self.paused, "recovery requires a paused child");
        self.send_raw(&Message::SetIsActive { active })?;

        // Drop breakpoints from this child's previous life; the target's
        // log will reinstall its own.
        for msg in self.messages.clone() {
            if let Message::SetBreakpoint {
                id,
                position: Some(_),
            } = msg
            {
                self.send_raw(&Message::SetBreakpoint { id, position: None })?;
            }
        }

        let actual_checkpoint = self.last_checkpoint;
        let actual_pause = self.paused_message.clone();
        let was_paused_at_checkpoint = self.paused_at_checkpoint();

        // Only pause state transfers; save directives and major
        // checkpoint assignments stay this child's own.
        self.paused = target.paused;
        self.paused_message = target.paused_message.clone();
        self.last_checkpoint = target.last_checkpoint;
        self.messages = target.messages.clone();

        let mut recovery = Recovery {
            stage: RecoveryStage::ReachingCheckpoint,
            target,
            next_message: 0,
            actual_checkpoint,
            actual_pause,
        };

        if actual_checkpoint < recovery.target.last_checkpoint {
            debug!(child = self.id, from = actual_checkpoint, to = recovery.target.last_checkpoint,
                   "recovery: running forward");
            self.send_raw(&Message::Resume { forward: true })?;
        } else if actual_checkpoint > recovery.target.last_checkpoint || !was_paused_at_checkpoint {
            let restore_to = self
                .latest_saved_at_or_before(recovery.target.last_checkpoint)
                .ok_or_else(|| {
                    SessionError::Protocol(format!(
                        "child {} cannot reach checkpoint {} for recovery",
                        self.id, recovery.target.last_checkpoint
                    ))
                })?;
            debug!(child = self.id, restore_to, "recovery: restoring");
            self.send_raw(&Message::RestoreCheckpoint {
                checkpoint: restore_to,
            })?;
        } else {
            recovery.stage = RecoveryStage::PlayingMessages;
            self.recovery = Some(recovery);
            return self.send_next_recovery_messages();
        }
        self.recovery = Some(recovery);
        Ok(())
    }

    /// Route one child message while recovering.
    pub fn on_recovery_message(&mut self, msg: Message) -> Result<(), SessionError> {
        self.last_heard = Instant::now();
        let Some(recovery) = self.recovery.as_mut() else {
            return Err(SessionError::Protocol(format!(
                "recovery message for non-recovering child {}",
                self.id
            )));
        };
        match recovery.stage {
            RecoveryStage::ReachingCheckpoint => match msg {
                Message::HitCheckpoint { checkpoint, .. } => {
                    let target_checkpoint = recovery.target.last_checkpoint;
                    recovery.actual_checkpoint = checkpoint;
                    recovery.actual_pause = Some(msg.clone());
                    if checkpoint != INVALID_CHECKPOINT
                        && self.sent_saves.contains(&checkpoint)
                    {
                        self.saved.insert(checkpoint);
                    }
                    if checkpoint < target_checkpoint {
                        self.send_raw(&Message::Resume { forward: true })
                    } else if checkpoint == target_checkpoint {
                        if let Some(recovery) = self.recovery.as_mut() {
                            recovery.stage = RecoveryStage::PlayingMessages;
                        }
                        self.send_next_recovery_messages()
                    } else {
                        Err(SessionError::Protocol(format!(
                            "child {} overshot recovery checkpoint {target_checkpoint}",
                            self.id
                        )))
                    }
                }
                Message::Paint { .. } => Ok(()),
                other => Err(SessionError::Protocol(format!(
                    "unexpected {} while child {} reaches recovery checkpoint",
                    other.kind_str(),
                    self.id
                ))),
            },
            RecoveryStage::PlayingMessages => match msg {
                Message::HitCheckpoint { checkpoint, .. } => {
                    recovery.actual_checkpoint = checkpoint;
                    recovery.actual_pause = Some(msg.clone());
                    self.send_next_recovery_messages()
                }
                Message::HitBreakpoint { .. } | Message::HitRecordingEndpoint => {
                    recovery.actual_pause = Some(msg.clone());
                    self.send_next_recovery_messages()
                }
                // A response re-pauses the child at the same point it was
                // already at.
                Message::DebuggerResponse { .. } => self.send_next_recovery_messages(),
                Message::Paint { .. } => Ok(()),
                other => Err(SessionError::Protocol(format!(
                    "unexpected {} while replaying messages to child {}",
                    other.kind_str(),
                    self.id
                ))),
            },
        }
    }

    fn send_next_recovery_messages(&mut self) -> Result<(), SessionError> {
        loop {
            let (msg, exhausted) = {
                let recovery = self.recovery.as_mut().expect("recovery in progress");
                if recovery.next_message >= recovery.target.messages.len() {
                    (None, true)
                } else {
                    let msg = recovery.target.messages[recovery.next_message].clone();
                    recovery.next_message += 1;
                    (Some(msg), false)
                }
            };
            if exhausted {
                return self.finish_recovery();
            }
            let msg = msg.expect("message while not exhausted");
            let waits_for_reply = !matches!(msg, Message::SetBreakpoint { .. });
            self.send_raw(&msg)?;
            if waits_for_reply {
                let recovery = self.recovery.as_ref().expect("recovery in progress");
                if recovery.next_message >= recovery.target.messages.len()
                    && !recovery.target.paused
                {
                    // The target was running; the message just sent put
                    // the child back in motion and its eventual pause is
                    // ordinary traffic, not a recovery reply.
                    self.recovery = None;
                    debug!(child = self.id, "recovery complete, child left running");
                }
                return Ok(());
            }
        }
    }

    fn finish_recovery(&mut self) -> Result<(), SessionError> {
        let recovery = self.recovery.take().expect("recovery in progress");
        if !pause_state_matches(
            recovery.target.paused_message.as_ref(),
            recovery.actual_pause.as_ref(),
        ) {
            warn!(child = self.id, "recovered pause state mismatch");
            return Err(SessionError::Protocol(format!(
                "child {} recovered to a different pause state",
                self.id
            )));
        }
        debug!(child = self.id, checkpoint = self.last_checkpoint, "recovery complete");
        Ok(())
    }
}

/// Compare pause messages up to nondeterministic fields (durations vary
/// across runs; identity does not).
fn pause_state_matches(a: Option<&Message>, b: Option<&Message>) -> bool {
    match (a, b) {
        (None, None) => true,
        (
            Some(Message::HitCheckpoint { checkpoint: a, .. }),
            Some(Message::HitCheckpoint { checkpoint: b, .. }),
        ) => a == b,
        (
            Some(Message::HitBreakpoint { breakpoints: a }),
            Some(Message::HitBreakpoint { breakpoints: b }),
        ) => a == b,
        (Some(Message::HitRecordingEndpoint), Some(Message::HitRecordingEndpoint)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleman::spawn::ChildHandle;
    use crate::protocol::{ChannelEvent, Position};
    use std::os::unix::net::UnixStream;

    struct NoopHandle;
    impl ChildHandle for NoopHandle {
        fn kill(&mut self) {}
        fn pid(&self) -> u32 {
            0
        }
    }

    // The peer end is handed back so sends have a live socket to land in.
    fn test_child(kind: ChildKind) -> (ChildProcess, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        let channel = crate::protocol::Channel::new(99, a, |_: ChannelEvent| {}).unwrap();
        let child = ChildProcess::new(
            0,
            kind,
            ChildRole::Standby,
            SpawnedChild {
                channel,
                handle: Box::new(NoopHandle),
            },
            serde_json::json!({}),
        );
        (child, b)
    }

    fn paused(child: &mut ChildProcess, checkpoint: CheckpointId) {
        child.note_incoming(&Message::HitCheckpoint {
            checkpoint,
            duration_us: 100,
        });
    }

    #[test]
    fn sending_to_unpaused_child_is_a_protocol_violation() {
        let (mut child, _peer) = test_child(ChildKind::Replaying);
        let err = child.send(Message::Resume { forward: true }).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
        // The two always-legal messages still go through.
        child.send(Message::CreateCheckpoint).unwrap();
        child.send(Message::Terminate).unwrap();
    }

    #[test]
    fn hit_checkpoint_clears_log_but_keeps_breakpoints() {
        let (mut child, _peer) = test_child(ChildKind::Replaying);
        paused(&mut child, 1);
        let bp = Position::Break {
            script: 1,
            offset: 0,
        };
        child
            .send(Message::SetBreakpoint {
                id: 0,
                position: Some(bp),
            })
            .unwrap();
        child.send(Message::Resume { forward: true }).unwrap();
        assert_eq!(child.messages.len(), 2);

        paused(&mut child, 2);
        assert_eq!(child.messages.len(), 1);
        assert!(matches!(child.messages[0], Message::SetBreakpoint { .. }));
    }

    #[test]
    fn set_breakpoint_coalesces_per_id() {
        let (mut child, _peer) = test_child(ChildKind::Replaying);
        paused(&mut child, 1);
        let at = |offset| Position::Break { script: 1, offset };
        child
            .send(Message::SetBreakpoint {
                id: 0,
                position: Some(at(4)),
            })
            .unwrap();
        child
            .send(Message::SetBreakpoint {
                id: 1,
                position: Some(at(8)),
            })
            .unwrap();
        child
            .send(Message::SetBreakpoint {
                id: 0,
                position: Some(at(12)),
            })
            .unwrap();
        assert_eq!(child.messages.len(), 2);
        assert!(child.messages.iter().any(|m| matches!(
            m,
            Message::SetBreakpoint { id: 0, position: Some(Position::Break { offset: 12, .. }) }
        )));

        // Clearing removes the surviving set entirely.
        child
            .send(Message::SetBreakpoint {
                id: 0,
                position: None,
            })
            .unwrap();
        assert_eq!(child.messages.len(), 1);
    }

    #[test]
    fn rewind_target_depends_on_pause_kind() {
        let (mut child, _peer) = test_child(ChildKind::Replaying);
        paused(&mut child, 3);
        assert_eq!(child.rewind_target_checkpoint(), 2);
        child.note_incoming(&Message::HitBreakpoint {
            breakpoints: vec![0],
        });
        assert_eq!(child.rewind_target_checkpoint(), 3);
    }

    #[test]
    fn saves_recorded_only_when_directed() {
        let (mut child, _peer) = test_child(ChildKind::Replaying);
        paused(&mut child, 1);
        assert!(child.has_saved(1));
        child.direct_save(3, true).unwrap();
        paused(&mut child, 2);
        assert!(!child.has_saved(2));
        paused(&mut child, 3);
        assert!(child.has_saved(3));
        assert_eq!(child.latest_saved_at_or_before(2), Some(1));
    }

    #[test]
    fn deferred_saves_wait_for_a_pause() {
        let (mut child, _peer) = test_child(ChildKind::Replaying);
        paused(&mut child, 1);
        child.send(Message::Resume { forward: true }).unwrap();
        child.direct_save(5, true).unwrap();
        assert_eq!(child.deferred_saves.len(), 1);
        paused(&mut child, 2);
        child.flush_deferred_saves().unwrap();
        assert!(child.deferred_saves.is_empty());
        assert!(child.should_save(5));
    }

    #[test]
    fn sending_resets_the_silence_clock() {
        let (mut child, _peer) = test_child(ChildKind::Replaying);
        paused(&mut child, 1);
        let before = child.last_heard();
        std::thread::sleep(std::time::Duration::from_millis(5));
        child.send(Message::Resume { forward: true }).unwrap();
        // The hang clock measures silence since the last interaction, so
        // time spent elsewhere between interactions cannot expire it.
        assert!(child.last_heard() > before);
    }

    #[test]
    fn undelivered_directive_does_not_mark_the_checkpoint_saved() {
        let (mut child, _peer) = test_child(ChildKind::Replaying);
        paused(&mut child, 1);
        child.send(Message::Resume { forward: true }).unwrap();
        // Directive issued while the child is already running; it cannot
        // reach the process before the next checkpoint.
        child.direct_save(2, true).unwrap();
        paused(&mut child, 2);
        assert!(child.should_save(2));
        assert!(!child.has_saved(2));
        // The checkpoint is behind the child now, so delivery keeps
        // waiting.
        child.flush_deferred_saves().unwrap();
        assert!(!child.has_saved(2));
        // A restore puts it ahead again; only then does passing it count.
        child
            .send(Message::RestoreCheckpoint { checkpoint: 1 })
            .unwrap();
        paused(&mut child, 1);
        child.flush_deferred_saves().unwrap();
        paused(&mut child, 2);
        assert!(child.has_saved(2));
    }

    #[test]
    fn major_base_falls_back_to_first() {
        let (mut child, _peer) = test_child(ChildKind::Replaying);
        paused(&mut child, 1);
        assert_eq!(child.major_base(10), FIRST_CHECKPOINT);
        child.mark_major(6).unwrap();
        assert_eq!(child.major_base(10), 6);
        assert_eq!(child.major_base(5), FIRST_CHECKPOINT);
    }
}
