use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use timewarp::bridge::DebuggerProxy;
use timewarp::sim::{Scenario, SharedTape, SimSpawner};
use timewarp::{Config, NavigationController, Position, SessionEvent, Tape, TapeEntry};

#[derive(Parser)]
#[command(name = "timewarp", version, about = "Record/replay navigation middleman")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a simulated program, then rewind into it and inspect a frame.
    Demo {
        /// Also persist the recording tape to this path.
        #[arg(long)]
        tape: Option<PathBuf>,
        /// Session configuration file (TOML overlaying the defaults).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print a summary of a recording tape file.
    Inspect { tape: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Demo { tape, config } => demo(tape, config),
        Command::Inspect { tape } => inspect(&tape),
    }
}

fn demo(tape_path: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => Config::load(path).context("loading config")?,
        None => Config::default(),
    };
    // The demo recording is tiny; tighten the scheduling intervals so
    // major checkpoints and flushes actually happen within it.
    config.major_checkpoint_interval_ms = 1;
    config.flush_interval_ms = 0;
    config.always_save_temporary_checkpoints = true;

    let tape = match &tape_path {
        Some(path) => SharedTape::with_file(path).context("creating tape file")?,
        None => SharedTape::new(),
    };
    let spawner = SimSpawner::with_tape(Scenario::demo(), &config, tape);
    let mut session = NavigationController::new(config, Box::new(spawner))?;

    println!("recording to the end of the program...");
    session.resume(true)?;
    wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtRecordingEndpoint)
    })?;

    println!("rewinding to the last execution of lib.js offset 8...");
    session.set_breakpoint(
        0,
        Some(Position::Break {
            script: 2,
            offset: 8,
        }),
    )?;
    session.resume(false)?;
    wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtBreakpoint { .. })
    })?;

    let mut proxy = DebuggerProxy::new();
    match proxy.get_frame(&mut session, -1)? {
        Some(frame) => {
            println!(
                "paused in script {} at offset {} (frame {})",
                frame.script, frame.offset, frame.index
            );
            let value = proxy.evaluate(&mut session, &frame, "callee")?;
            println!("evaluate(\"callee\") = {value:?}");
        }
        None => println!("paused with an empty stack"),
    }

    println!("running forward to the endpoint again...");
    proxy.invalidate();
    session.set_breakpoint(0, None)?;
    session.resume(true)?;
    wait_for(&mut session, |e| {
        matches!(e, SessionEvent::PausedAtRecordingEndpoint)
    })?;

    session.shutdown();
    if let Some(path) = tape_path {
        println!("tape written to {}", path.display());
    }
    Ok(())
}

/// Drain session events until one matches, echoing everything seen.
fn wait_for(
    session: &mut NavigationController,
    want: impl Fn(&SessionEvent) -> bool,
) -> Result<()> {
    loop {
        match session.wait_event(Duration::from_secs(10))? {
            Some(event) => {
                describe(&event);
                if let SessionEvent::FatalSessionError { message } = &event {
                    bail!("session failed: {message}");
                }
                if want(&event) {
                    return Ok(());
                }
            }
            None => bail!("timed out waiting for a session event"),
        }
    }
}

fn describe(event: &SessionEvent) {
    match event {
        SessionEvent::PausedAtCheckpoint { checkpoint } => {
            println!("  paused at checkpoint {checkpoint}");
        }
        SessionEvent::PausedAtBreakpoint { breakpoints } => {
            println!("  hit breakpoint {breakpoints:?}");
        }
        SessionEvent::PausedAtRecordingEndpoint => println!("  reached the recording endpoint"),
        SessionEvent::AtRecordingStart => println!("  reached the start of the recording"),
        SessionEvent::Painted { width, height, .. } => {
            println!("  repainted {width}x{height}");
        }
        SessionEvent::ChildRestarted { child, reason } => {
            println!("  child {child} restarted ({reason})");
        }
        SessionEvent::FatalSessionError { message } => println!("  fatal: {message}"),
    }
}

fn inspect(path: &Path) -> Result<()> {
    let tape = Tape::load(path).with_context(|| format!("loading {}", path.display()))?;
    println!("tape {}", tape.header.tape_id);
    println!("  schema version: {}", tape.header.schema_version);
    println!("  entries:        {}", tape.entries.len());
    println!("  checkpoints:    {}", tape.checkpoint_count());
    println!("  last progress:  {}", tape.last_progress());
    for entry in &tape.entries {
        if let TapeEntry::Script { id, url, .. } = entry {
            println!("  script {id}: {url}");
        }
    }
    Ok(())
}
