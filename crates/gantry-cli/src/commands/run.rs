//! `gantry run`: execute an experiment on the simulated drivers.
//!
//! Ctrl-C once asks for a graceful stop (no new dispatches, in-flight
//! processes finish). A second Ctrl-C forces the stop: processes are
//! aborted and the actuator halted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gantry_actuator::SimActuator;
use gantry_controller::{Controller, ControllerHandle};
use gantry_core::{PolicyKind, TomlRecipeLoader};
use gantry_state::{SnapshotSink, SnapshotStore};
use gantry_station::SimStation;
use tracing::{info, warn};

pub struct RunArgs {
    pub experiment: PathBuf,
    pub policy: Option<PolicyKind>,
    pub timeout: Option<Duration>,
    pub state_dir: Option<PathBuf>,
    pub resume: bool,
    pub timeline: Option<PathBuf>,
}

/// Returns the process exit code for the run outcome.
pub async fn run(args: RunArgs) -> Result<i32> {
    let loader = TomlRecipeLoader::open(&args.experiment)?;
    let config = loader.config();

    let mut controller = Controller::from_loader(
        config,
        &loader,
        Arc::new(SimActuator::new()),
        Arc::new(SimStation::new()),
    )?;
    if let Some(policy) = args.policy {
        controller = controller.with_policy(policy);
    }
    if args.timeout.is_some() {
        controller = controller.with_timeout(args.timeout);
    }

    if let Some(dir) = &args.state_dir {
        let store = SnapshotStore::open_dir(dir)
            .with_context(|| format!("opening snapshot store in {}", dir.display()))?;
        info!(path = %dir.display(), "snapshot store opened");
        if args.resume {
            match store.latest()? {
                Some(snapshot) => controller = controller.resume_from(&snapshot)?,
                None => warn!("no snapshot to resume from, starting fresh"),
            }
        }
        let sink: Arc<dyn SnapshotSink> = Arc::new(store);
        controller = controller.with_sink(sink);
    }

    info!(
        experiment = %config.experiment.name,
        run_id = controller.run_id(),
        policy = %controller.settings().policy,
        "starting run"
    );

    let signals = tokio::spawn(forward_interrupts(controller.handle()));
    let report = controller.run().await;
    signals.abort();

    if let Some(path) = &args.timeline {
        report
            .timeline
            .write_json(path)
            .with_context(|| format!("writing timeline to {}", path.display()))?;
        info!(path = %path.display(), "timeline written");
    }

    print!("{}", report.summary.render());
    if let Some(err) = &report.error {
        eprintln!("error: {err}");
    }
    Ok(report.exit_code())
}

async fn forward_interrupts(handle: ControllerHandle) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("interrupt received, stopping after in-flight processes (Ctrl-C again to force)");
    handle.stop();

    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("second interrupt, forcing stop");
    handle.force_stop();
}
