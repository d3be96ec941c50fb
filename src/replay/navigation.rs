use std::mem;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::protocol::{
    BreakpointId, CheckpointId, ExecutionPoint, Message, Position, Progress, FIRST_CHECKPOINT,
    INVALID_CHECKPOINT,
};

use super::breakpoints::WatchManager;
use super::engine::{CheckpointHandle, EngineEvent, ExecutionEngine};

#[derive(Debug, Clone)]
pub struct NavigationSettings {
    /// Recording children run forward only: no temporary checkpoints, no
    /// divergence, no backward resume.
    pub is_recording: bool,
    pub temporary_checkpoint_threshold: Duration,
    pub always_save_temporary_checkpoints: bool,
}

/// A debugger request handled at a breakpoint pause, kept so the pause
/// can be reconstructed after an unhandled divergence.
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub json: String,
    pub response: String,
    /// Set when this request previously triggered an unhandled divergence;
    /// on replay it must not diverge again.
    pub no_divergence: bool,
}

#[derive(Debug, Clone, Copy)]
struct Temp {
    handle: CheckpointHandle,
    point: ExecutionPoint,
}

/// How a backward search region ends.
#[derive(Debug, Clone, Copy)]
enum RegionEnd {
    AtCheckpoint(CheckpointId),
    AtPoint(ExecutionPoint),
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    tracked: Position,
    concrete: Position,
    progress: Progress,
}

#[derive(Debug)]
struct Region {
    start: CheckpointHandle,
    end: RegionEnd,
    current_checkpoint: CheckpointId,
    tracked: Vec<Position>,
    hits: Vec<Hit>,
}

#[derive(Debug)]
enum Phase {
    /// Paused at a normal checkpoint, or at the recording endpoint (with
    /// the endpoint's progress noted).
    CheckpointPaused {
        checkpoint: CheckpointId,
        diverged: bool,
        endpoint: Option<Progress>,
    },
    /// Paused at a breakpoint; requests handled here are logged for
    /// divergence recovery.
    BreakpointPaused {
        point: ExecutionPoint,
        requests: Vec<LoggedRequest>,
    },
    /// Running forward, watching for breakpoint hits.
    Forward,
    /// Running forward from a restore toward a known earlier-found target.
    ReachBreakpoint {
        target: ExecutionPoint,
        temp_at: Option<Progress>,
    },
    /// Scanning a region for the last breakpoint hit before its end.
    FindLastHit(Region),
}

/// The replay-side navigation machine.
///
/// Drives an `ExecutionEngine` through the five phases of time travel:
/// paused at a checkpoint, paused at a breakpoint, running forward,
/// running toward a known target, and scanning backward for the last hit.
/// Every transition is explicit; outgoing middleman messages accumulate
/// in the `out` buffer passed to each entry point.
pub struct Navigation {
    settings: NavigationSettings,
    breakpoints: Vec<(BreakpointId, Position)>,
    watches: WatchManager,
    temps: Vec<Temp>,
    phase: Phase,
    phase_started: Instant,
}

impl Navigation {
    pub fn new(settings: NavigationSettings) -> Self {
        Navigation {
            settings,
            breakpoints: Vec::new(),
            watches: WatchManager::new(),
            temps: Vec::new(),
            phase: Phase::CheckpointPaused {
                checkpoint: INVALID_CHECKPOINT,
                diverged: false,
                endpoint: None,
            },
            phase_started: Instant::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.phase,
            Phase::Forward | Phase::ReachBreakpoint { .. } | Phase::FindLastHit(_)
        )
    }

    pub fn paused_at_breakpoint(&self) -> bool {
        matches!(self.phase, Phase::BreakpointPaused { .. })
    }

    pub fn set_breakpoint(&mut self, id: BreakpointId, position: Option<Position>) {
        self.breakpoints.retain(|(existing, _)| *existing != id);
        if let Some(position) = position {
            trace!(id, kind = position.kind_str(), "set breakpoint");
            self.breakpoints.push((id, position));
        } else {
            trace!(id, "clear breakpoint");
        }
    }

    /// Handle a Resume from the middleman. Only legal while paused.
    pub fn resume(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        forward: bool,
        out: &mut Vec<Message>,
    ) {
        let phase = mem::replace(&mut self.phase, Phase::Forward);
        match phase {
            Phase::CheckpointPaused {
                checkpoint,
                diverged,
                endpoint,
            } => {
                if forward {
                    if diverged {
                        engine.restore(CheckpointHandle::normal(checkpoint));
                        self.temps.clear();
                    }
                    self.run_forward(engine);
                } else {
                    let end = match endpoint {
                        Some(progress) => RegionEnd::AtPoint(ExecutionPoint {
                            checkpoint,
                            progress,
                            position: None,
                        }),
                        None => RegionEnd::AtCheckpoint(checkpoint),
                    };
                    let start = if endpoint.is_some() && engine.has_saved(checkpoint) {
                        Some(checkpoint)
                    } else {
                        latest_saved_below(engine, checkpoint)
                    };
                    match start {
                        Some(start) => {
                            self.enter_find_last_hit(engine, CheckpointHandle::normal(start), end)
                        }
                        None => fail(out, "no saved checkpoint to rewind to"),
                    }
                }
            }
            Phase::BreakpointPaused { point, .. } => {
                if self.settings.is_recording {
                    if forward {
                        self.run_forward(engine);
                    } else {
                        fail(out, "recording process cannot rewind");
                    }
                    return;
                }
                // The pause saved a temporary checkpoint at `point`; it is
                // the top of the stack.
                let Some(pause_temp) = self.temps.last().copied() else {
                    fail(out, "breakpoint pause without temporary checkpoint");
                    return;
                };
                if forward {
                    // Erase side effects of any diverged requests.
                    engine.restore(pause_temp.handle);
                    self.run_forward(engine);
                } else {
                    match self.handle_below(engine, pause_temp.handle, point.checkpoint) {
                        Some(below) => self.enter_find_last_hit(
                            engine,
                            below,
                            RegionEnd::AtPoint(pause_temp.point),
                        ),
                        None => fail(out, "no saved checkpoint to rewind to"),
                    }
                }
            }
            running => {
                self.phase = running;
                fail(out, "resume while already running");
            }
        }
    }

    /// Handle a RestoreCheckpoint from the middleman: rewind directly to a
    /// saved normal checkpoint and report the pause.
    pub fn external_restore(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        checkpoint: CheckpointId,
        out: &mut Vec<Message>,
    ) {
        if !engine.has_saved(checkpoint) {
            fail(out, &format!("restore to unsaved checkpoint {checkpoint}"));
            return;
        }
        engine.restore(CheckpointHandle::normal(checkpoint));
        self.temps.clear();
        self.watches.reset(engine);
        self.pause_at_checkpoint(checkpoint, 0, out);
    }

    /// Feed one engine event to the current phase.
    pub fn on_event(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        event: EngineEvent,
        out: &mut Vec<Message>,
    ) {
        if !self.is_running() {
            fail(out, "engine event while paused");
            return;
        }
        match event {
            EngineEvent::NewScript { script, progress } => {
                self.watches.on_new_script(engine, script);
                self.on_hit(engine, Position::NewScript, progress, out);
            }
            EngineEvent::Position { position, progress } => {
                self.on_hit(engine, position, progress, out);
            }
            EngineEvent::Checkpoint { id, duration_us } => {
                self.on_checkpoint(engine, id, duration_us, out);
            }
            EngineEvent::RecordingEndpoint { progress } => {
                self.on_endpoint(engine, progress, out);
            }
        }
    }

    fn on_hit(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        concrete: Position,
        progress: Progress,
        out: &mut Vec<Message>,
    ) {
        let phase = mem::replace(&mut self.phase, Phase::Forward);
        match phase {
            Phase::Forward => {
                if self.breakpoint_ids_matching(&concrete).is_empty() {
                    return;
                }
                self.pause_at_breakpoint(engine, concrete, progress, out);
            }
            Phase::ReachBreakpoint { target, temp_at } => {
                if temp_at == Some(progress) {
                    if self.settings.always_save_temporary_checkpoints
                        || self.phase_started.elapsed()
                            >= self.settings.temporary_checkpoint_threshold
                    {
                        let handle = engine.save_temporary();
                        let point =
                            ExecutionPoint::new(engine.last_checkpoint(), progress, concrete);
                        debug!(?handle, %point, "saved temporary checkpoint en route");
                        self.temps.push(Temp { handle, point });
                    }
                    self.phase = Phase::ReachBreakpoint {
                        target,
                        temp_at: None,
                    };
                    return;
                }
                if progress == target.progress {
                    self.pause_at_breakpoint(engine, concrete, progress, out);
                } else if progress > target.progress {
                    fail(out, "ran past navigation target");
                } else {
                    self.phase = Phase::ReachBreakpoint { target, temp_at };
                }
            }
            Phase::FindLastHit(mut region) => {
                if let RegionEnd::AtPoint(end) = region.end {
                    if progress >= end.progress {
                        self.phase = Phase::FindLastHit(region);
                        self.finish_region(engine, out);
                        return;
                    }
                }
                for tracked in &region.tracked {
                    if tracked.matches_hit(&concrete) {
                        region.hits.push(Hit {
                            tracked: *tracked,
                            concrete,
                            progress,
                        });
                    }
                }
                self.phase = Phase::FindLastHit(region);
            }
            paused => {
                self.phase = paused;
                fail(out, "position hit while paused");
            }
        }
    }

    fn on_checkpoint(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        id: CheckpointId,
        duration_us: u64,
        out: &mut Vec<Message>,
    ) {
        let phase = mem::replace(&mut self.phase, Phase::Forward);
        match phase {
            Phase::Forward => {
                // Passing a normal checkpoint invalidates temporaries.
                self.temps.clear();
                self.pause_at_checkpoint(id, duration_us, out);
            }
            Phase::ReachBreakpoint { target, temp_at } => {
                // The target lies beyond this checkpoint; keep going.
                self.temps.clear();
                self.phase = Phase::ReachBreakpoint { target, temp_at };
            }
            Phase::FindLastHit(mut region) => {
                let done = matches!(region.end, RegionEnd::AtCheckpoint(end) if id >= end);
                region.current_checkpoint = id;
                self.phase = Phase::FindLastHit(region);
                if done {
                    self.finish_region(engine, out);
                } else {
                    self.temps.clear();
                }
            }
            paused => {
                self.phase = paused;
                fail(out, "checkpoint while paused");
            }
        }
    }

    fn on_endpoint(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        progress: Progress,
        out: &mut Vec<Message>,
    ) {
        let phase = mem::replace(&mut self.phase, Phase::Forward);
        match phase {
            Phase::Forward => {
                self.phase = Phase::CheckpointPaused {
                    checkpoint: engine.last_checkpoint(),
                    diverged: false,
                    endpoint: Some(progress),
                };
                self.phase_started = Instant::now();
                out.push(Message::HitRecordingEndpoint);
            }
            Phase::ReachBreakpoint { .. } => {
                fail(out, "hit recording endpoint before navigation target");
            }
            Phase::FindLastHit(region) => {
                self.phase = Phase::FindLastHit(region);
                self.finish_region(engine, out);
            }
            paused => {
                self.phase = paused;
                fail(out, "endpoint while paused");
            }
        }
    }

    fn run_forward(&mut self, engine: &mut dyn ExecutionEngine) {
        self.watches.reset(engine);
        for (_, position) in self.breakpoints.clone() {
            self.watches.ensure(engine, &position);
        }
        self.phase = Phase::Forward;
        self.phase_started = Instant::now();
    }

    fn pause_at_checkpoint(
        &mut self,
        checkpoint: CheckpointId,
        duration_us: u64,
        out: &mut Vec<Message>,
    ) {
        self.phase = Phase::CheckpointPaused {
            checkpoint,
            diverged: false,
            endpoint: None,
        };
        self.phase_started = Instant::now();
        out.push(Message::HitCheckpoint {
            checkpoint,
            duration_us,
        });
    }

    fn pause_at_breakpoint(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        concrete: Position,
        progress: Progress,
        out: &mut Vec<Message>,
    ) {
        let ids = self.breakpoint_ids_matching(&concrete);
        let point = ExecutionPoint::new(engine.last_checkpoint(), progress, concrete);
        if !self.settings.is_recording {
            let handle = engine.save_temporary();
            self.temps.push(Temp { handle, point });
        }
        debug!(%point, ?ids, "paused at breakpoint");
        self.phase = Phase::BreakpointPaused {
            point,
            requests: Vec::new(),
        };
        self.phase_started = Instant::now();
        out.push(Message::HitBreakpoint { breakpoints: ids });
    }

    fn breakpoint_ids_matching(&self, concrete: &Position) -> Vec<BreakpointId> {
        let mut ids: Vec<BreakpointId> = self
            .breakpoints
            .iter()
            .filter(|(_, position)| position.matches_hit(concrete))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn enter_find_last_hit(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        start: CheckpointHandle,
        end: RegionEnd,
    ) {
        let mut tracked: Vec<Position> = Vec::new();
        for (_, position) in &self.breakpoints {
            if !tracked.contains(position) {
                tracked.push(*position);
            }
        }
        // Track each breakpoint script's entry point so a later
        // ReachBreakpoint can shortcut from it, but never let an entry
        // point mask or merge with a real breakpoint position.
        for (_, position) in self.breakpoints.clone() {
            let Some(script) = position.script() else {
                continue;
            };
            let Some(offset) = engine.entry_offset(script) else {
                continue;
            };
            let entry = Position::Break { script, offset };
            if !tracked
                .iter()
                .any(|t| entry.subsumes(t) || t.subsumes(&entry))
            {
                tracked.push(entry);
            }
        }

        engine.restore(start);
        self.prune_temps_above(start);
        self.watches.reset(engine);
        for position in &tracked {
            self.watches.ensure(engine, position);
        }
        if let RegionEnd::AtPoint(point) = end {
            if let Some(position) = point.position {
                self.watches.ensure(engine, &position);
            }
        }
        debug!(?start, ?end, "scanning region for last hit");
        self.phase = Phase::FindLastHit(Region {
            start,
            end,
            current_checkpoint: start.normal,
            tracked,
            hits: Vec::new(),
        });
        self.phase_started = Instant::now();
    }

    fn finish_region(&mut self, engine: &mut dyn ExecutionEngine, out: &mut Vec<Message>) {
        let Phase::FindLastHit(region) = mem::replace(&mut self.phase, Phase::Forward) else {
            unreachable!("finish_region outside FindLastHit");
        };

        let best = region
            .hits
            .iter()
            .rev()
            .find(|hit| self.breakpoints.iter().any(|(_, p)| *p == hit.tracked))
            .copied();

        if let Some(best) = best {
            let target =
                ExecutionPoint::new(region.current_checkpoint, best.progress, best.concrete);
            let mut temp_at = None;
            if let Some(script) = best.concrete.script() {
                if let Some(offset) = engine.entry_offset(script) {
                    let entry = Position::Break { script, offset };
                    if region.tracked.contains(&entry) {
                        temp_at = region
                            .hits
                            .iter()
                            .rev()
                            .find(|h| h.tracked == entry && h.progress < best.progress)
                            .map(|h| h.progress);
                    }
                }
            }
            self.enter_reach(engine, region.start, target, temp_at);
            return;
        }

        if region.start.is_temporary() {
            // Nothing hit in this span; continue below the temporary
            // checkpoint the span started from.
            let Some(start_temp) = self
                .temps
                .iter()
                .copied()
                .find(|t| t.handle == region.start)
            else {
                fail(out, "temporary checkpoint record missing");
                return;
            };
            match self.handle_below(engine, region.start, start_temp.point.checkpoint) {
                Some(below) => {
                    self.enter_find_last_hit(engine, below, RegionEnd::AtPoint(start_temp.point))
                }
                None => fail(out, "no saved checkpoint to rewind to"),
            }
            return;
        }

        // Nothing was ever hit before the region end: pause at the
        // region's checkpoint. The middleman decides whether to keep
        // rewinding from there.
        engine.restore(region.start);
        self.temps.clear();
        self.watches.reset(engine);
        self.pause_at_checkpoint(region.start.normal, 0, out);
    }

    /// The restorable handle directly below `handle`: the previous
    /// temporary, or a saved normal checkpoint at or below `checkpoint`.
    fn handle_below(
        &self,
        engine: &dyn ExecutionEngine,
        handle: CheckpointHandle,
        checkpoint: CheckpointId,
    ) -> Option<CheckpointHandle> {
        if handle.temporary > 1 {
            let idx = self.temps.iter().position(|t| t.handle == handle)?;
            if idx > 0 {
                return Some(self.temps[idx - 1].handle);
            }
        }
        if engine.has_saved(checkpoint) {
            return Some(CheckpointHandle::normal(checkpoint));
        }
        latest_saved_below(engine, checkpoint).map(CheckpointHandle::normal)
    }

    fn enter_reach(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        start: CheckpointHandle,
        target: ExecutionPoint,
        temp_at: Option<Progress>,
    ) {
        engine.restore(start);
        self.prune_temps_above(start);
        self.watches.reset(engine);
        if let Some(position) = target.position {
            self.watches.ensure(engine, &position);
            if temp_at.is_some() {
                if let Some(script) = position.script() {
                    if let Some(offset) = engine.entry_offset(script) {
                        self.watches
                            .ensure(engine, &Position::Break { script, offset });
                    }
                }
            }
        }
        debug!(?start, %target, ?temp_at, "running to navigation target");
        self.phase = Phase::ReachBreakpoint { target, temp_at };
        self.phase_started = Instant::now();
    }

    fn prune_temps_above(&mut self, handle: CheckpointHandle) {
        self.temps
            .retain(|t| t.handle.normal == handle.normal && t.handle.temporary <= handle.temporary);
    }

    // Bridge hooks: divergence and the breakpoint-pause request log.

    /// Whether a debugger request may diverge from the recording at the
    /// current pause. Requires a snapshot to restore afterwards.
    pub fn divergence_allowed(&self, engine: &dyn ExecutionEngine) -> bool {
        if self.settings.is_recording {
            return false;
        }
        match &self.phase {
            Phase::BreakpointPaused { .. } => true,
            Phase::CheckpointPaused { checkpoint, .. } => engine.has_saved(*checkpoint),
            _ => false,
        }
    }

    pub fn mark_diverged(&mut self) {
        if let Phase::CheckpointPaused { diverged, .. } = &mut self.phase {
            *diverged = true;
        }
    }

    pub fn log_request(&mut self, request: LoggedRequest) {
        if let Phase::BreakpointPaused { requests, .. } = &mut self.phase {
            requests.push(request);
        }
    }

    /// Rewind to the current pause point after an unhandled divergence.
    /// Returns the requests to replay against the reconstructed pause.
    pub fn recover_from_divergence(
        &mut self,
        engine: &mut dyn ExecutionEngine,
    ) -> Option<Vec<LoggedRequest>> {
        match &mut self.phase {
            Phase::BreakpointPaused { requests, .. } => {
                let log = mem::take(requests);
                let temp = self.temps.last()?;
                engine.restore(temp.handle);
                Some(log)
            }
            Phase::CheckpointPaused {
                checkpoint,
                diverged,
                ..
            } => {
                engine.restore(CheckpointHandle::normal(*checkpoint));
                *diverged = false;
                self.temps.clear();
                Some(Vec::new())
            }
            _ => None,
        }
    }
}

fn latest_saved_below(
    engine: &dyn ExecutionEngine,
    checkpoint: CheckpointId,
) -> Option<CheckpointId> {
    (FIRST_CHECKPOINT..checkpoint)
        .rev()
        .find(|c| engine.has_saved(*c))
}

fn fail(out: &mut Vec<Message>, message: &str) {
    out.push(Message::FatalError {
        message: message.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ScriptedEngine, SharedTape};
    use crate::tape::TapeEntry;

    fn settings() -> NavigationSettings {
        NavigationSettings {
            is_recording: false,
            temporary_checkpoint_threshold: Duration::from_millis(0),
            always_save_temporary_checkpoints: true,
        }
    }

    /// Four checkpoints, one script, and three site hits: offset 4 fires
    /// at progress 5 and 8, offset 8 at progress 6.
    fn test_engine() -> ScriptedEngine {
        let tape = SharedTape::new();
        let entries = [
            TapeEntry::Checkpoint {
                id: 1,
                progress: 0,
                duration_us: 0,
            },
            TapeEntry::Script {
                id: 1,
                url: "main.js".into(),
                entry_offset: 0,
                source: "function main() {}".into(),
                progress: 1,
            },
            TapeEntry::Step {
                progress: 2,
                position: Position::EnterFrame,
            },
            TapeEntry::Step {
                progress: 3,
                position: Position::Break {
                    script: 1,
                    offset: 0,
                },
            },
            TapeEntry::Checkpoint {
                id: 2,
                progress: 4,
                duration_us: 1000,
            },
            TapeEntry::Step {
                progress: 5,
                position: Position::Break {
                    script: 1,
                    offset: 4,
                },
            },
            TapeEntry::Step {
                progress: 6,
                position: Position::Break {
                    script: 1,
                    offset: 8,
                },
            },
            TapeEntry::Checkpoint {
                id: 3,
                progress: 7,
                duration_us: 1000,
            },
            TapeEntry::Step {
                progress: 8,
                position: Position::Break {
                    script: 1,
                    offset: 4,
                },
            },
            TapeEntry::Checkpoint {
                id: 4,
                progress: 9,
                duration_us: 1000,
            },
        ];
        for entry in entries {
            tape.append(entry);
        }
        assert!(tape.flush());
        let mut engine = ScriptedEngine::replaying(tape);
        engine.set_save_checkpoint(FIRST_CHECKPOINT, true);
        engine
    }

    fn resume(nav: &mut Navigation, engine: &mut ScriptedEngine, forward: bool) -> Message {
        let mut out = Vec::new();
        nav.resume(engine, forward, &mut out);
        while out.is_empty() {
            let event = engine.run_to_next_event();
            nav.on_event(engine, event, &mut out);
        }
        assert_eq!(out.len(), 1, "expected a single pause message: {out:?}");
        out.remove(0)
    }

    fn at_breakpoint(nav: &mut Navigation, engine: &mut ScriptedEngine) {
        nav.set_breakpoint(
            0,
            Some(Position::Break {
                script: 1,
                offset: 4,
            }),
        );
        loop {
            match resume(nav, engine, true) {
                Message::HitCheckpoint { .. } => continue,
                Message::HitBreakpoint { .. } => return,
                other => panic!("unexpected pause {other:?}"),
            }
        }
    }

    #[test]
    fn forward_pauses_at_every_checkpoint_then_the_endpoint() {
        let mut engine = test_engine();
        let mut nav = Navigation::new(settings());
        for expected in 1..=4 {
            let msg = resume(&mut nav, &mut engine, true);
            assert!(
                matches!(msg, Message::HitCheckpoint { checkpoint, .. } if checkpoint == expected),
                "checkpoint {expected}: {msg:?}"
            );
        }
        let msg = resume(&mut nav, &mut engine, true);
        assert!(matches!(msg, Message::HitRecordingEndpoint));
        assert!(!nav.is_running());
    }

    #[test]
    fn breakpoint_hit_pauses_with_its_ids() {
        let mut engine = test_engine();
        let mut nav = Navigation::new(settings());
        at_breakpoint(&mut nav, &mut engine);
        assert!(nav.paused_at_breakpoint());
        assert_eq!(engine.progress(), 5);
    }

    #[test]
    fn backward_finds_the_last_hit_before_the_pause() {
        let mut engine = test_engine();
        let mut nav = Navigation::new(settings());
        loop {
            if matches!(
                resume(&mut nav, &mut engine, true),
                Message::HitRecordingEndpoint
            ) {
                break;
            }
        }
        nav.set_breakpoint(
            0,
            Some(Position::Break {
                script: 1,
                offset: 4,
            }),
        );
        let msg = resume(&mut nav, &mut engine, false);
        assert!(
            matches!(msg, Message::HitBreakpoint { ref breakpoints } if breakpoints == &[0]),
            "{msg:?}"
        );
        assert_eq!(engine.progress(), 8);
        assert_eq!(engine.last_checkpoint(), 3);
    }

    #[test]
    fn repeated_backward_resumes_reach_strictly_earlier_hits() {
        let mut engine = test_engine();
        let mut nav = Navigation::new(settings());
        loop {
            if matches!(
                resume(&mut nav, &mut engine, true),
                Message::HitRecordingEndpoint
            ) {
                break;
            }
        }
        nav.set_breakpoint(
            0,
            Some(Position::Break {
                script: 1,
                offset: 4,
            }),
        );
        assert!(matches!(
            resume(&mut nav, &mut engine, false),
            Message::HitBreakpoint { .. }
        ));
        assert_eq!(engine.progress(), 8);

        assert!(matches!(
            resume(&mut nav, &mut engine, false),
            Message::HitBreakpoint { .. }
        ));
        assert_eq!(engine.progress(), 5);
        assert_eq!(engine.last_checkpoint(), 2);

        // No hit remains below progress 5; the scan bottoms out at the
        // saved checkpoint and reports it.
        let msg = resume(&mut nav, &mut engine, false);
        assert!(
            matches!(msg, Message::HitCheckpoint { checkpoint: 1, .. }),
            "{msg:?}"
        );
    }

    #[test]
    fn backward_with_no_hits_pauses_at_the_saved_checkpoint() {
        let mut engine = test_engine();
        let mut nav = Navigation::new(settings());
        for _ in 0..3 {
            assert!(matches!(
                resume(&mut nav, &mut engine, true),
                Message::HitCheckpoint { .. }
            ));
        }
        nav.set_breakpoint(
            0,
            Some(Position::Break {
                script: 1,
                offset: 100,
            }),
        );
        let msg = resume(&mut nav, &mut engine, false);
        assert!(
            matches!(msg, Message::HitCheckpoint { checkpoint: 1, .. }),
            "{msg:?}"
        );
    }

    #[test]
    fn restore_to_an_unsaved_checkpoint_is_fatal() {
        let mut engine = test_engine();
        let mut nav = Navigation::new(settings());
        assert!(matches!(
            resume(&mut nav, &mut engine, true),
            Message::HitCheckpoint { .. }
        ));
        let mut out = Vec::new();
        nav.external_restore(&mut engine, 3, &mut out);
        assert!(matches!(out.as_slice(), [Message::FatalError { .. }]));
    }

    #[test]
    fn divergence_recovery_returns_the_request_log() {
        let mut engine = test_engine();
        let mut nav = Navigation::new(settings());
        at_breakpoint(&mut nav, &mut engine);

        nav.log_request(LoggedRequest {
            json: "{\"kind\":\"getFrame\"}".into(),
            response: "{}".into(),
            no_divergence: false,
        });
        nav.log_request(LoggedRequest {
            json: "{\"kind\":\"frameEvaluate\"}".into(),
            response: "{}".into(),
            no_divergence: true,
        });

        let log = nav
            .recover_from_divergence(&mut engine)
            .expect("pause is recoverable");
        assert_eq!(log.len(), 2);
        assert!(log[1].no_divergence);
        // The engine is back at the pause point.
        assert_eq!(engine.progress(), 5);
        assert!(nav.paused_at_breakpoint());
    }
}
