// talos_backends/src/bin/collect.rs

//! Teleoperated demonstration collection. Runs the control loop in teleop
//! mode against the scenario's backend and persists one episode per run.
//! Ctrl-C ends the current episode with the operator's chosen label and
//! stops the run.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use talos_backends::cli::{init_tracing, RunArgs};
use talos_backends::scenario;
use talos_backends::setup::Rig;
use talos_core::episode::EpisodeOutcome;
use talos_core::scheduler::ActionProvider;
use tracing::{info, warn};

/// How a Ctrl-C'd episode is labelled on disk.
#[derive(ValueEnum, Debug, Clone, Copy)]
enum StopLabel {
    Success,
    Failure,
    Aborted,
}

impl From<StopLabel> for EpisodeOutcome {
    fn from(label: StopLabel) -> Self {
        match label {
            StopLabel::Success => EpisodeOutcome::Success,
            StopLabel::Failure => EpisodeOutcome::Failure,
            StopLabel::Aborted => EpisodeOutcome::Aborted,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    run: RunArgs,

    /// Outcome label applied when Ctrl-C ends an episode. A deliberate stop
    /// usually means the demonstration worked.
    #[arg(long, value_enum, default_value = "success")]
    stop_label: StopLabel,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let scenario = scenario::load(&args.run.scenario)
        .with_context(|| format!("loading scenario {}", args.run.scenario.display()))?;

    let mut rig = Rig::from_scenario(&scenario, args.run.storage.clone());
    let (teleop_cell, _teleop_feed) = rig.spawn_teleop(&scenario);

    // Ctrl-C ends the episode in progress and breaks the run loop.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let stop = rig.control.stop_handle();
        let interrupted = Arc::clone(&interrupted);
        let label: EpisodeOutcome = args.stop_label.into();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
            stop.request_stop_with(label);
        })
        .context("installing Ctrl-C handler")?;
    }

    rig.control
        .connect(rig.backend.as_ref())
        .context("connecting to backend")?;
    info!(backend = %rig.backend.id(), episodes = args.run.episodes, "collection started");

    let mut provider = ActionProvider::Teleop(teleop_cell);
    let mut recorded = 0usize;
    for episode in 0..args.run.episodes {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }

        let report = rig
            .control
            .run_episode(&mut provider)
            .with_context(|| format!("running episode {episode}"))?;
        info!(
            episode,
            steps = report.steps,
            outcome = ?report.outcome,
            overruns = report.stats.overruns,
            "episode complete"
        );

        // Losing a demonstration must be loud, so wait for the disk.
        let path = report
            .handle
            .wait()
            .with_context(|| format!("persisting episode {episode}"))?;
        println!("episode {episode}: {} steps -> {}", report.steps, path.display());
        recorded += 1;

        if let Some(fault) = report.fault {
            warn!(error = %fault, "session faulted; stopping collection");
            break;
        }
    }

    let _ = rig.control.close();
    if recorded == 0 {
        bail!("no episodes were recorded");
    }
    println!("recorded {recorded} episode(s)");
    Ok(())
}
