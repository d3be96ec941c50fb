//! Crash and hang recovery: a lost replaying child is respawned and walked
//! back to the state the dead one held, without the debugger noticing
//! anything beyond a restart notification.

use timewarp::replay::ChildKind;
use timewarp::sim::{Scenario, SimFault, SimSpawner};
use timewarp::{Position, SessionEvent};

use super::common::session::{run_to_endpoint, start, test_config, wait_for};

fn session_with_fault(fault: SimFault) -> timewarp::NavigationController {
    let config = test_config();
    let mut spawner = SimSpawner::new(Scenario::demo(), &config);
    spawner.arm_fault(fault);
    start(config, spawner)
}

#[test]
fn crashed_replaying_child_is_restarted_and_rewind_still_works() {
    let mut session = session_with_fault(SimFault {
        kind: ChildKind::Replaying,
        spawn_index: 0,
        crash_at_checkpoint: Some(3),
        hang_at_checkpoint: None,
    });

    let mut events = run_to_endpoint(&mut session);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SessionEvent::ChildRestarted { .. })),
        "expected a restart on the way to the endpoint: {events:?}"
    );

    // The respawned child can still serve a rewind.
    session
        .set_breakpoint(0, Some(Position::Break { script: 2, offset: 8 }))
        .expect("set breakpoint");
    session.resume(false).expect("rewind");
    events = wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtBreakpoint { .. })
    });
    assert!(matches!(
        events.last(),
        Some(SessionEvent::PausedAtBreakpoint { .. })
    ));
    session.shutdown();
}

#[test]
fn hung_replaying_child_is_restarted() {
    let mut session = session_with_fault(SimFault {
        kind: ChildKind::Replaying,
        spawn_index: 1,
        crash_at_checkpoint: None,
        hang_at_checkpoint: Some(3),
    });

    let events = run_to_endpoint(&mut session);
    assert!(
        events
            .iter()
            .any(|e| matches!(
                e,
                SessionEvent::ChildRestarted { reason, .. } if reason == "hang"
            )),
        "expected a hang restart: {events:?}"
    );
    session.shutdown();
}

#[test]
fn faultless_sessions_never_report_restarts() {
    let mut session = super::common::session::demo_session();
    let events = run_to_endpoint(&mut session);
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, SessionEvent::ChildRestarted { .. })),
        "{events:?}"
    );
    session.shutdown();
}
