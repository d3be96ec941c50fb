//! Divergence handling at a replayed breakpoint pause: refused requests,
//! unhandled divergence, and the transparent pause reconstruction that
//! replays the request log.

use timewarp::{Position, SessionEvent};

use super::common::session::{demo_session, request, run_to_endpoint, wait_for};

fn rewind_to_breakpoint(session: &mut timewarp::NavigationController) {
    run_to_endpoint(session);
    session
        .set_breakpoint(0, Some(Position::Break { script: 2, offset: 8 }))
        .expect("set breakpoint");
    session.resume(false).expect("rewind");
    wait_for(session, |e| {
        matches!(e, SessionEvent::PausedAtBreakpoint { .. })
    });
}

#[test]
fn unhandled_divergence_reconstructs_the_pause() {
    let mut session = demo_session();
    rewind_to_breakpoint(&mut session);

    // Establish a request log at this pause.
    let frame = request(&mut session, r#"{"kind":"getFrame","index":-1}"#);
    assert_eq!(frame["frame"]["script"], 2);

    // The scripted engine treats this expression as an unhandled
    // divergence. The child rewinds to the pause, replays the log, and
    // answers the trigger with divergence refused.
    let resp = request(
        &mut session,
        r#"{"kind":"frameEvaluate","index":0,"text":"__diverge__"}"#,
    );
    assert_eq!(resp["divergence"], "frameEvaluate");

    // The pause survived: the same frame is still there and ordinary
    // evaluation still works.
    let frame = request(&mut session, r#"{"kind":"getFrame","index":-1}"#);
    assert_eq!(frame["frame"]["script"], 2);
    assert_eq!(frame["frame"]["offset"], 8);
    let resp = request(
        &mut session,
        r#"{"kind":"frameEvaluate","index":0,"text":"x"}"#,
    );
    let result = resp["result"]["primitive"].as_str().expect("primitive result");
    assert!(result.starts_with("eval:x@"), "{result}");
    session.shutdown();
}

#[test]
fn reconstruction_replays_the_request_log_and_keeps_handles_valid() {
    let mut session = demo_session();
    rewind_to_breakpoint(&mut session);

    // Vend object handles for both frames' callees, in a fixed order.
    let newest = request(&mut session, r#"{"kind":"getFrame","index":-1}"#);
    let newest_callee = newest["frame"]["callee"]["object"]
        .as_u64()
        .expect("callee handle");
    let oldest = request(&mut session, r#"{"kind":"getFrame","index":0}"#);
    let oldest_callee = oldest["frame"]["callee"]["object"]
        .as_u64()
        .expect("callee handle");
    assert_ne!(newest_callee, oldest_callee);

    let resp = request(
        &mut session,
        r#"{"kind":"frameEvaluate","index":0,"text":"__diverge__"}"#,
    );
    assert_eq!(resp["divergence"], "frameEvaluate");

    // Reconstruction rewound the child and re-issued the logged requests
    // in order, rebuilding the same id map: a handle vended before the
    // divergence still resolves, and to the same kind of object.
    let resp = request(
        &mut session,
        &format!(r#"{{"kind":"getObject","object":{oldest_callee}}}"#),
    );
    assert!(resp["exception"].is_null(), "{resp}");
    assert_eq!(resp["class"], "Function");
    session.shutdown();
}

#[test]
fn navigation_still_works_after_a_divergence_recovery() {
    let mut session = demo_session();
    rewind_to_breakpoint(&mut session);

    let resp = request(
        &mut session,
        r#"{"kind":"frameEvaluate","index":0,"text":"__diverge__"}"#,
    );
    assert_eq!(resp["divergence"], "frameEvaluate");

    // Rewinding from the reconstructed pause reaches an earlier hit.
    session.resume(false).expect("rewind");
    let events = wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtBreakpoint { .. })
    });
    assert!(matches!(
        events.last(),
        Some(SessionEvent::PausedAtBreakpoint { .. })
    ));
    session.shutdown();
}
