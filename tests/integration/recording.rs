//! Recording a session forward: checkpoint pauses, interrupting with
//! pause, and the persisted tape.

use tempfile::tempdir;

use timewarp::sim::{Scenario, SharedTape, SimSpawner};
use timewarp::{Position, SessionEvent, Tape, TapeEntry};

use super::common::session::{request, run_to_endpoint, start, test_config, wait_for};

#[test]
fn recording_runs_to_the_endpoint() {
    let mut session = super::common::session::demo_session();
    let events = run_to_endpoint(&mut session);
    assert!(matches!(
        events.last(),
        Some(SessionEvent::PausedAtRecordingEndpoint)
    ));
    session.shutdown();
}

#[test]
fn pause_interrupts_a_running_recording_at_a_checkpoint() {
    let mut session = super::common::session::demo_session();
    session.resume(true).expect("resume");
    session.pause().expect("pause");
    let events = wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtCheckpoint { .. })
    });
    let Some(SessionEvent::PausedAtCheckpoint { checkpoint }) = events.last() else {
        unreachable!();
    };
    assert!(*checkpoint >= 1);

    // The session keeps working after the interruption.
    run_to_endpoint(&mut session);
    session.shutdown();
}

#[test]
fn pause_hands_inspection_to_a_replaying_child() {
    let mut session = super::common::session::demo_session();
    session.resume(true).expect("resume");
    session.pause().expect("pause");
    let events = wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtCheckpoint { .. })
    });
    let Some(SessionEvent::PausedAtCheckpoint { checkpoint }) = events.last() else {
        unreachable!();
    };
    let paused_at = *checkpoint;
    assert!(paused_at >= 1);
    assert_ne!(session.active_child(), 0);

    // The pause point was saved on the replaying child, so evaluation is
    // answered instead of refused for divergence.
    let resp = request(
        &mut session,
        r#"{"kind":"frameEvaluate","index":0,"text":"x"}"#,
    );
    let result = resp["result"]["primitive"]
        .as_str()
        .unwrap_or_else(|| panic!("primitive evaluate result, got {resp}"));
    assert!(result.starts_with("eval:x@"), "{result}");

    // Rewinding works straight from the handed-off pause.
    session.resume(false).expect("rewind");
    let events = wait_for(&mut session, |e| {
        matches!(
            e,
            SessionEvent::PausedAtCheckpoint { .. } | SessionEvent::AtRecordingStart
        )
    });
    match events.last() {
        Some(SessionEvent::PausedAtCheckpoint { checkpoint }) => {
            assert!(*checkpoint < paused_at);
        }
        Some(SessionEvent::AtRecordingStart) => {}
        other => unreachable!("{other:?}"),
    }
    session.shutdown();
}

#[test]
fn forward_run_stops_at_a_breakpoint_before_the_endpoint() {
    let mut session = super::common::session::demo_session();
    session
        .set_breakpoint(0, Some(Position::Break { script: 2, offset: 8 }))
        .expect("set breakpoint");
    session.resume(true).expect("resume");
    let events = wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtBreakpoint { .. })
    });
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, SessionEvent::PausedAtRecordingEndpoint)),
        "breakpoint should interrupt the run before the endpoint"
    );
    let Some(SessionEvent::PausedAtBreakpoint { breakpoints }) = events.last() else {
        unreachable!();
    };
    assert_eq!(breakpoints, &[0]);

    let frame = request(&mut session, r#"{"kind":"getFrame","index":-1}"#);
    assert_eq!(frame["frame"]["script"], 2);
    assert_eq!(frame["frame"]["offset"], 8);

    // Resuming from the hit still reaches the end of the recording.
    session.set_breakpoint(0, None).expect("clear breakpoint");
    let events = run_to_endpoint(&mut session);
    assert!(matches!(
        events.last(),
        Some(SessionEvent::PausedAtRecordingEndpoint)
    ));
    session.shutdown();
}

#[test]
fn recording_persists_a_loadable_tape() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.tape");
    let config = test_config();
    let tape = SharedTape::with_file(&path).expect("tape file");
    let tape_id = tape.tape_id();
    let spawner = SimSpawner::with_tape(Scenario::demo(), &config, tape);
    let mut session = start(config, spawner);

    run_to_endpoint(&mut session);
    session.shutdown();

    let loaded = Tape::load(&path).expect("loadable tape");
    assert_eq!(loaded.header.tape_id, tape_id);
    assert_eq!(loaded.checkpoint_count(), 7);

    // Progress is strictly increasing across steps and scripts.
    let mut last = 0;
    for entry in &loaded.entries {
        match entry {
            TapeEntry::Checkpoint { progress, .. } => assert!(*progress >= last),
            other => {
                assert!(other.progress() > last, "non-increasing at {other:?}");
                last = other.progress();
            }
        }
    }
}
