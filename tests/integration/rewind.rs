//! Backward navigation: plain rewinds, breakpoint searches, and handing
//! control back to the recording child.

use timewarp::{Position, SessionEvent};

use super::common::session::{
    demo_session, progress_at_pause, request, run_to_endpoint, wait_for,
};

fn breakpoint_at(script: u32, offset: u32) -> Option<Position> {
    Some(Position::Break { script, offset })
}

#[test]
fn plain_rewinds_stop_one_checkpoint_earlier_each_time() {
    let mut session = demo_session();
    run_to_endpoint(&mut session);

    let mut previous = u32::MAX;
    for _ in 0..3 {
        session.resume(false).expect("rewind");
        let events = wait_for(&mut session, |e| {
            matches!(e, SessionEvent::PausedAtCheckpoint { .. })
        });
        let Some(SessionEvent::PausedAtCheckpoint { checkpoint }) = events.last() else {
            unreachable!();
        };
        assert!(*checkpoint < previous, "expected earlier than {previous}");
        previous = *checkpoint;
    }
    session.shutdown();
}

#[test]
fn rewinding_past_the_first_checkpoint_reports_the_recording_start() {
    let mut session = demo_session();
    run_to_endpoint(&mut session);

    for _ in 0..16 {
        session.resume(false).expect("rewind");
        let events = wait_for(&mut session, |e| {
            matches!(
                e,
                SessionEvent::PausedAtCheckpoint { .. } | SessionEvent::AtRecordingStart
            )
        });
        if matches!(events.last(), Some(SessionEvent::AtRecordingStart)) {
            session.shutdown();
            return;
        }
    }
    panic!("never reached the start of the recording");
}

#[test]
fn breakpoint_rewind_lands_on_the_last_hit() {
    let mut session = demo_session();
    run_to_endpoint(&mut session);

    session
        .set_breakpoint(0, breakpoint_at(2, 8))
        .expect("set breakpoint");
    session.resume(false).expect("rewind");
    let events = wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtBreakpoint { .. })
    });
    let Some(SessionEvent::PausedAtBreakpoint { breakpoints }) = events.last() else {
        unreachable!();
    };
    assert_eq!(breakpoints, &[0]);

    let frame = request(&mut session, r#"{"kind":"getFrame","index":-1}"#);
    assert_eq!(frame["frame"]["script"], 2);
    assert_eq!(frame["frame"]["offset"], 8);
    session.shutdown();
}

#[test]
fn repeated_breakpoint_rewinds_reach_strictly_earlier_hits() {
    let mut session = demo_session();
    run_to_endpoint(&mut session);
    session
        .set_breakpoint(0, breakpoint_at(2, 8))
        .expect("set breakpoint");

    session.resume(false).expect("rewind");
    wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtBreakpoint { .. })
    });
    let first = progress_at_pause(&mut session);

    session.resume(false).expect("rewind");
    wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtBreakpoint { .. })
    });
    let second = progress_at_pause(&mut session);

    assert!(
        second < first,
        "second hit ({second}) should precede the first ({first})"
    );
    session.shutdown();
}

#[test]
fn running_forward_after_a_rewind_returns_to_the_recording_endpoint() {
    let mut session = demo_session();
    run_to_endpoint(&mut session);

    session.resume(false).expect("rewind");
    wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtCheckpoint { .. })
    });

    // Forward from a replayed position: replay catches up with the flushed
    // recording, control returns to the recording child, and the run ends
    // at the endpoint again.
    session.resume(true).expect("resume forward");
    wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtRecordingEndpoint)
    });
    session.shutdown();
}
