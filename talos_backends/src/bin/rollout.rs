// talos_backends/src/bin/rollout.rs

//! Closed-loop policy rollout. Loads the scenario's policy behind the
//! bounded-wait inference worker and drives the control loop in rollout
//! mode. Each episode is persisted like any teleop demonstration.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use talos_backends::cli::{init_tracing, RunArgs};
use talos_backends::policies;
use talos_backends::scenario;
use talos_backends::setup::Rig;
use talos_core::policy::InferenceWorker;
use talos_core::scheduler::ActionProvider;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let scenario = scenario::load(&args.run.scenario)
        .with_context(|| format!("loading scenario {}", args.run.scenario.display()))?;

    let Some(policy_spec) = scenario.policy.clone() else {
        bail!(
            "scenario {} has no [policy] section; rollouts need one",
            args.run.scenario.display()
        );
    };
    let runner = policies::load(&policy_spec)
        .with_context(|| format!("loading {} policy", policy_spec.family_str()))?;
    let worker = InferenceWorker::spawn(runner);
    info!(policy = worker.identity(), capability = ?worker.capability(), "policy loaded");

    let mut rig = Rig::from_scenario(&scenario, args.run.storage.clone());

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let stop = rig.control.stop_handle();
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
            stop.request_stop();
        })
        .context("installing Ctrl-C handler")?;
    }

    rig.control
        .connect(rig.backend.as_ref())
        .context("connecting to backend")?;
    info!(backend = %rig.backend.id(), episodes = args.run.episodes, "rollout started");

    let mut provider = ActionProvider::Policy(worker);
    for episode in 0..args.run.episodes {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }

        let report = rig
            .control
            .run_episode(&mut provider)
            .with_context(|| format!("running rollout {episode}"))?;
        info!(
            episode,
            steps = report.steps,
            outcome = ?report.outcome,
            inference_timeouts = report.stats.policy_timeouts,
            overruns = report.stats.overruns,
            "rollout complete"
        );

        let path = report
            .handle
            .wait()
            .with_context(|| format!("persisting rollout {episode}"))?;
        println!(
            "rollout {episode}: {} steps, outcome {:?} -> {}",
            report.steps,
            report.outcome,
            path.display()
        );

        if let Some(fault) = report.fault {
            warn!(error = %fault, "session faulted; stopping rollouts");
            break;
        }
    }

    let _ = rig.control.close();
    Ok(())
}
