use std::time::Duration;

use serde_json::Value;

use timewarp::sim::{Scenario, SimSpawner};
use timewarp::{Config, NavigationController, SessionEvent};

/// Config with intervals shrunk so the tiny demo scenario exercises
/// flushing, major checkpoint scheduling, and temporary checkpoints.
pub fn test_config() -> Config {
    Config {
        rewinding_enabled: true,
        hang_timeout_ms: 2_000,
        max_restarts: 3,
        major_checkpoint_interval_ms: 1,
        flush_interval_ms: 0,
        temporary_checkpoint_threshold_ms: 0,
        always_save_temporary_checkpoints: true,
    }
}

pub fn start(config: Config, spawner: SimSpawner) -> NavigationController {
    NavigationController::new(config, Box::new(spawner)).expect("session starts")
}

pub fn demo_session() -> NavigationController {
    let config = test_config();
    let spawner = SimSpawner::new(Scenario::demo(), &config);
    start(config, spawner)
}

/// Drain events until one matches, returning everything seen on the way
/// (the matching event last). Panics on timeout.
pub fn wait_for(
    session: &mut NavigationController,
    want: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        match session
            .wait_event(Duration::from_secs(10))
            .expect("session event")
        {
            Some(event) => {
                let done = want(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
            None => panic!("timed out waiting for a session event; saw {seen:?}"),
        }
    }
}

pub fn run_to_endpoint(session: &mut NavigationController) -> Vec<SessionEvent> {
    session.resume(true).expect("resume forward");
    wait_for(session, |e| {
        matches!(e, SessionEvent::PausedAtRecordingEndpoint)
    })
}

pub fn request(session: &mut NavigationController, json: &str) -> Value {
    let response = session.debugger_request(json).expect("debugger request");
    serde_json::from_str(&response).expect("well-formed response")
}

/// The engine's progress counter at the current breakpoint pause,
/// extracted from the scripted evaluator's `eval:<text>@<progress>`
/// reply.
pub fn progress_at_pause(session: &mut NavigationController) -> u64 {
    let resp = request(
        session,
        r#"{"kind":"frameEvaluate","index":0,"text":"mark"}"#,
    );
    let result = resp["result"]["primitive"]
        .as_str()
        .unwrap_or_else(|| panic!("primitive evaluate result, got {resp}"));
    let (_, progress) = result
        .rsplit_once('@')
        .unwrap_or_else(|| panic!("progress-tagged result, got {result}"));
    progress.parse().expect("numeric progress")
}
