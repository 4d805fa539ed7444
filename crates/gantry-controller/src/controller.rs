//! The run loop.
//!
//! Phases advance `Preparing → Running → Draining → Complete`, or end in
//! `Aborted` on timeout, stop, force stop or a fatal driver error. The
//! loop owns the [`SharedActuator`] and the resource pool outright, so
//! every align, transfer, prime, fill and empty is issued from this one
//! task and physical operations are totally ordered. Station-local
//! processes run as spawned tasks tracked in a `JoinSet`; each flips its
//! station back to Idle exactly once, when its completion signal arrives.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use gantry_actuator::{ActuatorDriver, ActuatorError, ActuatorView, ResourcePool, SharedActuator};
use gantry_core::{
    DriverError, ExperimentConfig, FailurePolicy, PolicyKind, Position, Recipe, RecipeLoader,
    SourceId, StationId, Task, format_elapsed, validate_actuator,
};
use gantry_scheduler::{IdleHint, ScheduleDecision, SchedulePolicy, SkipReason, Snapshot, build_policy};
use gantry_state::{
    NullSink, RunRecord, SnapshotKind, SnapshotSink, StateSnapshot, new_run_id, now_millis,
};
use gantry_station::{ProcessResult, ProcessSpec, Station, StationDriver};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{RunError, RunResult, Severity};
use crate::summary::{DispatchRecord, FailedAttempt, RunOutcome, RunSummary, SkippedTask, StationSummary};
use crate::timeline::{Lane, Timeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Preparing,
    Running,
    Draining,
    Complete,
    Aborted,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Preparing => "preparing",
            RunPhase::Running => "running",
            RunPhase::Draining => "draining",
            RunPhase::Complete => "complete",
            RunPhase::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Complete | RunPhase::Aborted)
    }
}

/// Operator request delivered to a running controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Continue,
    /// Dispatch nothing new; let local processes finish.
    Stop,
    /// Abort local processes and halt the actuator.
    Force,
}

/// Cloneable handle for stopping a run from another task.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: Arc<watch::Sender<StopSignal>>,
}

impl ControllerHandle {
    /// Request a graceful stop. Has no effect after a force stop.
    pub fn stop(&self) {
        self.tx.send_if_modified(|signal| {
            if *signal == StopSignal::Continue {
                *signal = StopSignal::Stop;
                true
            } else {
                false
            }
        });
    }

    pub fn force_stop(&self) {
        self.tx.send_replace(StopSignal::Force);
    }

    pub fn signal(&self) -> StopSignal {
        *self.tx.borrow()
    }
}

/// Run-loop tunables, gathered from the `[run]` and `[actuator]` tables.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub policy: PolicyKind,
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub lookahead: Duration,
    pub drain_timeout: Duration,
    /// Added to the phase durations when computing a station's ETC.
    pub process_overhead: Duration,
    pub on_task_failure: FailurePolicy,
    pub auto_fill: bool,
    /// Draw-and-return cycles run before each fill.
    pub prewet_cycles: u32,
    pub empty_on_cleanup: bool,
    /// Rinse every source after emptying it during cleanup.
    pub rinse_on_cleanup: bool,
    pub rinse_cycles: u32,
    pub home_on_start: bool,
    pub fill_at: Option<Position>,
    pub dump_at: Option<Position>,
}

impl RunSettings {
    pub fn from_config(config: &ExperimentConfig) -> Self {
        let run = &config.run;
        Self {
            policy: run.policy,
            timeout: run.timeout,
            poll_interval: run.poll_interval,
            lookahead: run.lookahead,
            drain_timeout: run.drain_timeout,
            process_overhead: run.process_overhead,
            on_task_failure: run.on_task_failure,
            auto_fill: run.auto_fill,
            prewet_cycles: run.prewet_cycles,
            empty_on_cleanup: run.empty_on_cleanup,
            rinse_on_cleanup: run.rinse_on_cleanup,
            rinse_cycles: run.rinse_cycles,
            home_on_start: config.actuator.home_on_start,
            fill_at: config.actuator.fill,
            dump_at: config.actuator.dump,
        }
    }
}

/// Everything a finished run leaves behind.
#[derive(Debug)]
pub struct RunReport {
    pub phase: RunPhase,
    pub summary: RunSummary,
    pub timeline: Timeline,
    /// The error that ended the run early, if any.
    pub error: Option<RunError>,
}

impl RunReport {
    pub fn outcome(&self) -> &RunOutcome {
        &self.summary.outcome
    }

    pub fn exit_code(&self) -> i32 {
        self.summary.exit_code()
    }
}

/// A local process that has signalled completion.
struct Completion {
    station: Arc<Station>,
    task: Task,
    started: Instant,
    finished: Instant,
    result: ProcessResult,
}

enum LoopExit {
    Completed,
    TimedOut,
    Stopped,
    Forced,
    Fatal(RunError),
}

impl LoopExit {
    fn from_error(error: RunError) -> Self {
        match error {
            RunError::ForceStopped => LoopExit::Forced,
            other => LoopExit::Fatal(other),
        }
    }
}

pub struct Controller {
    run_id: String,
    experiment: String,
    settings: RunSettings,
    policy: Box<dyn SchedulePolicy>,
    stations: Vec<Arc<Station>>,
    index: BTreeMap<StationId, usize>,
    pool: ResourcePool,
    demand: BTreeMap<SourceId, f64>,
    actuator: SharedActuator,
    station_driver: Arc<dyn StationDriver>,
    sink: Arc<dyn SnapshotSink>,
    phase: RunPhase,
    stop_tx: Arc<watch::Sender<StopSignal>>,
    stop_rx: watch::Receiver<StopSignal>,
    in_flight: JoinSet<Completion>,
    timeline: Timeline,
    ledger: Vec<StationSummary>,
    dispatch_order: Vec<DispatchRecord>,
    snapshot_seq: u64,
    started: Instant,
    started_wall: u64,
    /// Housekeeping that failed last time; not retried until something changes.
    failed_hint: Option<IdleHint>,
}

impl Controller {
    pub fn new(
        config: &ExperimentConfig,
        recipe: Recipe,
        actuator: Arc<dyn ActuatorDriver>,
        station_driver: Arc<dyn StationDriver>,
    ) -> RunResult<Self> {
        validate_actuator(&config.actuator)?;
        let pool = ResourcePool::from_configs(&recipe.sources)
            .map_err(|e| RunError::InvalidRecipe(e.to_string()))?;
        let settings = RunSettings::from_config(config);
        let stations: Vec<Arc<Station>> = recipe
            .stations
            .iter()
            .map(|s| Arc::new(Station::from_recipe(s)))
            .collect();
        let index = stations
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        let ledger = stations
            .iter()
            .map(|s| StationSummary::new(s.id.clone()))
            .collect();
        let (stop_tx, stop_rx) = watch::channel(StopSignal::Continue);
        let now = Instant::now();

        Ok(Self {
            run_id: new_run_id(),
            experiment: config.experiment.name.clone(),
            policy: build_policy(settings.policy, settings.lookahead),
            demand: recipe.demand(),
            actuator: SharedActuator::from_config(actuator, &config.actuator),
            settings,
            stations,
            index,
            pool,
            station_driver,
            sink: Arc::new(NullSink),
            phase: RunPhase::Preparing,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            in_flight: JoinSet::new(),
            timeline: Timeline::new(now),
            ledger,
            dispatch_order: Vec::new(),
            snapshot_seq: 0,
            started: now,
            started_wall: now_millis(),
            failed_hint: None,
        })
    }

    /// Build a controller whose stations and pool come from `loader`.
    pub fn from_loader(
        config: &ExperimentConfig,
        loader: &dyn RecipeLoader,
        actuator: Arc<dyn ActuatorDriver>,
        station_driver: Arc<dyn StationDriver>,
    ) -> RunResult<Self> {
        let recipe = loader.load()?;
        Self::new(config, recipe, actuator, station_driver)
    }

    /// Load the recipe from the experiment itself and build a controller.
    pub fn from_experiment(
        config: &ExperimentConfig,
        actuator: Arc<dyn ActuatorDriver>,
        station_driver: Arc<dyn StationDriver>,
    ) -> RunResult<Self> {
        Self::from_loader(config, config, actuator, station_driver)
    }

    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.settings.policy = policy;
        self.policy = build_policy(policy, self.settings.lookahead);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.timeout = timeout;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Restore source volumes and the actuator position from a snapshot of
    /// an earlier run.
    pub fn resume_from(mut self, snapshot: &StateSnapshot) -> RunResult<Self> {
        for (id, level) in &snapshot.resource_levels {
            match self.pool.get_mut(id) {
                Ok(source) => source.set_volume(*level).map_err(|e| {
                    RunError::InvalidRecipe(format!("snapshot {}: {e}", snapshot.table_key()))
                })?,
                Err(_) => {
                    warn!(source = %id, "snapshot source not in recipe, ignoring");
                }
            }
        }
        self.actuator.assume_position(snapshot.actuator_position);
        info!(
            from_run = %snapshot.run_id,
            seq = snapshot.seq,
            position = %snapshot.actuator_position,
            "resuming from snapshot"
        );
        Ok(self)
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.stop_tx.clone(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Drive the run to a terminal phase. Cleanup always runs.
    pub async fn run(mut self) -> RunReport {
        self.started = Instant::now();
        self.started_wall = now_millis();
        self.timeline = Timeline::new(self.started);
        self.record_run(None);
        info!(
            run_id = %self.run_id,
            experiment = %self.experiment,
            policy = self.policy.name(),
            stations = self.stations.len(),
            "run starting"
        );

        let (outcome, error) = match self.prepare().await {
            Err(e) if e.severity() == Severity::Setup => {
                error!(run_id = %self.run_id, error = %e, "preparation failed, nothing moved");
                self.set_phase(RunPhase::Aborted);
                self.cleanup(false).await;
                (RunOutcome::SetupFailed { reason: e.to_string() }, Some(e))
            }
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "preparation failed");
                self.set_phase(RunPhase::Aborted);
                self.cleanup(true).await;
                (RunOutcome::Aborted { reason: e.to_string() }, Some(e))
            }
            Ok(()) => {
                self.set_phase(RunPhase::Running);
                let exit = self.run_loop().await;

                self.set_phase(RunPhase::Draining);
                self.drain(matches!(exit, LoopExit::Forced)).await;

                let (phase, outcome, error) = match exit {
                    LoopExit::Completed => (RunPhase::Complete, RunOutcome::Completed, None),
                    LoopExit::TimedOut => (RunPhase::Aborted, RunOutcome::TimedOut, None),
                    LoopExit::Stopped => (RunPhase::Aborted, RunOutcome::Stopped, None),
                    LoopExit::Forced => (
                        RunPhase::Aborted,
                        RunOutcome::ForceStopped,
                        Some(RunError::ForceStopped),
                    ),
                    LoopExit::Fatal(e) => (
                        RunPhase::Aborted,
                        RunOutcome::Aborted { reason: e.to_string() },
                        Some(e),
                    ),
                };
                self.set_phase(phase);
                self.cleanup(true).await;
                (outcome, error)
            }
        };
        self.finish(outcome, error)
    }

    // ── Preparing ──────────────────────────────────────────────────

    async fn prepare(&mut self) -> RunResult<()> {
        if !self.actuator.is_connected() {
            return Err(RunError::DriverUnavailable(
                "actuator driver is not connected".into(),
            ));
        }
        if !self.station_driver.is_connected() {
            return Err(RunError::DriverUnavailable(
                "station driver is not connected".into(),
            ));
        }
        self.pool
            .check_demand(&self.demand, self.settings.auto_fill)
            .map_err(RunError::InsufficientResource)?;

        if self.settings.home_on_start {
            match self.actuator.home().await {
                Ok(_) => {}
                Err(ActuatorError::Driver(DriverError::Unsupported(_))) => {
                    debug!(position = %self.actuator.position(), "driver cannot home, keeping last known position");
                }
                Err(e) => return Err(RunError::Actuator(e)),
            }
        }
        if self.settings.auto_fill {
            self.fill_deficits().await?;
        }

        self.emit_snapshot(SnapshotKind::Prepared, None);
        info!(
            run_id = %self.run_id,
            tasks = self.stations.iter().map(|s| s.queue_len()).sum::<usize>(),
            "prepared"
        );
        Ok(())
    }

    async fn fill_deficits(&mut self) -> RunResult<()> {
        let deficits = self
            .pool
            .deficits(&self.demand)
            .map_err(RunError::InsufficientResource)?;
        for (id, amount) in deficits {
            let source = self
                .pool
                .get_mut(&id)
                .map_err(RunError::InsufficientResource)?;
            let fill_at = self.settings.fill_at.unwrap_or(source.position);
            info!(source = %id, amount, "filling deficit");
            self.actuator
                .fill(source, amount, fill_at, self.settings.prewet_cycles)
                .await
                .map_err(RunError::Actuator)?;
        }
        Ok(())
    }

    // ── Running ────────────────────────────────────────────────────

    async fn run_loop(&mut self) -> LoopExit {
        let deadline = self.settings.timeout.map(|t| self.started + t);
        loop {
            if let Err(e) = self.reap() {
                return LoopExit::from_error(e);
            }
            for station in &self.stations {
                station.mark_complete_if_drained();
            }
            if self.stations.iter().all(|s| s.is_complete()) {
                info!(run_id = %self.run_id, "all stations complete");
                return LoopExit::Completed;
            }
            if let Some(exit) = self.check_stop(deadline) {
                return exit;
            }

            let snapshot = self.snapshot();
            match self.policy.next(&snapshot) {
                ScheduleDecision::Dispatch { station, task } => {
                    if let Err(e) = self.dispatch(&station, task).await {
                        return LoopExit::from_error(e);
                    }
                    if self.policy.waits_for_completion() {
                        if let Some(exit) = self.await_in_flight(deadline).await {
                            return exit;
                        }
                    }
                }
                ScheduleDecision::Skip {
                    station,
                    task,
                    reason,
                } => self.skip(&station, &task, reason),
                ScheduleDecision::Idle(hint) => {
                    match self.housekeeping(hint).await {
                        Ok(true) => continue,
                        Ok(false) => {}
                        Err(e) if e.severity() == Severity::Run => {
                            return LoopExit::from_error(e);
                        }
                        Err(e) => warn!(error = %e, "idle housekeeping failed"),
                    }
                    if let Err(e) = self.idle_wait(deadline).await {
                        return LoopExit::from_error(e);
                    }
                }
            }
        }
    }

    fn check_stop(&mut self, deadline: Option<Instant>) -> Option<LoopExit> {
        let signal = *self.stop_rx.borrow_and_update();
        match signal {
            StopSignal::Force => {
                warn!(run_id = %self.run_id, "force stop requested");
                return Some(LoopExit::Forced);
            }
            StopSignal::Stop => {
                info!(run_id = %self.run_id, "stop requested, no further dispatch");
                return Some(LoopExit::Stopped);
            }
            StopSignal::Continue => {}
        }
        match deadline {
            Some(deadline) if Instant::now() >= deadline => {
                warn!(run_id = %self.run_id, "experiment timeout reached");
                Some(LoopExit::TimedOut)
            }
            _ => None,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            stations: self
                .stations
                .iter()
                .enumerate()
                .map(|(i, s)| s.view(i))
                .collect(),
            pool: self.pool.view(),
            actuator: self.actuator.view(),
            rest: self.actuator.rest(),
            now: Instant::now(),
        }
    }

    /// Dequeue the head of `station_id` and run it. Only run-fatal errors
    /// are returned; task failures go through the failure policy.
    async fn dispatch(&mut self, station_id: &StationId, planned: Task) -> RunResult<()> {
        let idx = self.station_index(station_id)?;
        let station = self.stations[idx].clone();
        let task = match station.dequeue() {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "dispatch target has nothing queued");
                return Ok(());
            }
        };
        debug_assert_eq!(task.seq, planned.seq);
        self.failed_hint = None;

        let mut stop_rx = self.stop_rx.clone();
        let attempt = tokio::select! {
            result = self.execute(&station, &task) => result,
            _ = force_requested(&mut stop_rx) => Err(RunError::ForceStopped),
        };
        match attempt {
            Ok(()) => Ok(()),
            Err(e) if e.severity() == Severity::Task => {
                self.task_failed(&station, task, &e);
                Ok(())
            }
            Err(e) => {
                error!(station = %station.id, task = task.seq, error = %e, "dispatch aborted");
                self.ledger[idx].failures.push(FailedAttempt {
                    seq: task.seq,
                    attempt: task.attempts,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Align, transfer, then start the local process.
    async fn execute(&mut self, station: &Arc<Station>, task: &Task) -> RunResult<()> {
        let transfer_failed = |e: &dyn std::fmt::Display| RunError::TransferFailed {
            station: station.id.clone(),
            reason: e.to_string(),
        };
        let offset = self
            .pool
            .get(&task.source_id)
            .map_err(|e| transfer_failed(&e))?
            .offset;
        let target = station.position.minus(&offset);
        let dispatched_at = Instant::now();
        info!(
            station = %station.id,
            task = task.seq,
            source = %task.source_id,
            amount = task.amount,
            attempt = task.attempts + 1,
            "dispatching"
        );

        self.actuator
            .align_to(target)
            .await
            .map_err(|e| RunError::from_align(&station.id, e))?;
        let source = self
            .pool
            .get_mut(&task.source_id)
            .map_err(|e| transfer_failed(&e))?;
        self.actuator
            .transfer(task.amount, source, &station.id)
            .await
            .map_err(|e| RunError::from_transfer(&station.id, e))?;

        let started = Instant::now();
        let local = task.local_duration() + self.settings.process_overhead;
        station.mark_busy(started + local)?;
        let done = self.station_driver.start_local_process(ProcessSpec {
            station: station.id.clone(),
            task_seq: task.seq,
            phases: task.phases.clone(),
        });
        let tracked = station.clone();
        let process_task = task.clone();
        self.in_flight.spawn(async move {
            let result = done.await.unwrap_or_else(|_| {
                Err(DriverError::Disconnected(
                    "station driver dropped the process".into(),
                ))
            });
            // Failed processes stay Busy until the run loop has applied
            // the failure policy.
            if result.is_ok() {
                tracked.mark_idle();
                tracked.mark_complete_if_drained();
            }
            Completion {
                station: tracked,
                task: process_task,
                started,
                finished: Instant::now(),
                result,
            }
        });

        let idx = self.station_index(&station.id)?;
        self.ledger[idx].dispatched.push(task.seq);
        self.dispatch_order.push(DispatchRecord {
            station: station.id.clone(),
            seq: task.seq,
        });
        let event = self.timeline.mark("dispatch", dispatched_at);
        event.station = Some(station.id.clone());
        event.task = Some(task.seq);
        event.detail = Some(format!("{} x {}", task.source_id, task.amount));
        debug!(
            station = %station.id,
            task = task.seq,
            local_ms = local.as_millis() as u64,
            "local process started"
        );
        self.emit_snapshot(SnapshotKind::Dispatch, Some((station.id.clone(), task.seq)));
        Ok(())
    }

    fn skip(&mut self, station_id: &StationId, planned: &Task, reason: SkipReason) {
        let Ok(idx) = self.station_index(station_id) else {
            return;
        };
        match self.stations[idx].dequeue() {
            Ok(task) => {
                debug_assert_eq!(task.seq, planned.seq);
                warn!(station = %station_id, task = task.seq, reason = %reason, "task skipped");
                let event = self.timeline.mark("skip", Instant::now());
                event.station = Some(station_id.clone());
                event.task = Some(task.seq);
                event.detail = Some(reason.to_string());
                self.ledger[idx].skipped.push(SkippedTask {
                    seq: task.seq,
                    reason,
                });
            }
            Err(e) => warn!(error = %e, "skip target has nothing queued"),
        }
    }

    /// Apply the failure policy to a task whose dispatch or process failed.
    fn task_failed(&mut self, station: &Arc<Station>, task: Task, error: &RunError) {
        let Ok(idx) = self.station_index(&station.id) else {
            return;
        };
        self.ledger[idx].failures.push(FailedAttempt {
            seq: task.seq,
            attempt: task.attempts,
            error: error.to_string(),
        });

        let retry = match self.settings.on_task_failure {
            FailurePolicy::Requeue(budget) => {
                self.phase == RunPhase::Running && task.attempts < budget
            }
            FailurePolicy::Drop => false,
        };
        if retry {
            match station.requeue(task.retried()) {
                Ok(()) => {
                    warn!(
                        station = %station.id,
                        task = task.seq,
                        attempt = task.attempts + 1,
                        error = %error,
                        "task failed, requeued at tail"
                    );
                    return;
                }
                Err(e) => warn!(station = %station.id, error = %e, "requeue refused"),
            }
        }

        warn!(station = %station.id, task = task.seq, error = %error, "task failed, dropped");
        let event = self.timeline.mark("drop", Instant::now());
        event.station = Some(station.id.clone());
        event.task = Some(task.seq);
        event.detail = Some(error.to_string());
        self.ledger[idx].skipped.push(SkippedTask {
            seq: task.seq,
            reason: SkipReason::DispatchFailed {
                error: error.to_string(),
            },
        });
    }

    /// Act on an idle hint. Returns whether the hint changed the actuator
    /// or pool state, in which case the loop asks the policy again without
    /// sleeping.
    async fn housekeeping(&mut self, hint: IdleHint) -> RunResult<bool> {
        if hint == IdleHint::Wait || self.failed_hint.as_ref() == Some(&hint) {
            return Ok(false);
        }
        let before = self.idle_state();
        match self.perform(&hint).await {
            Ok(()) => {
                self.failed_hint = None;
                Ok(self.idle_state() != before)
            }
            Err(e) => {
                self.failed_hint = Some(hint);
                Err(e)
            }
        }
    }

    /// What idle housekeeping can change: where the actuator is, whether
    /// it can prime, and which sources are primed.
    fn idle_state(&self) -> (ActuatorView, Vec<bool>) {
        let primed = self.pool.iter().map(|s| s.is_primed()).collect();
        (self.actuator.view(), primed)
    }

    async fn perform(&mut self, hint: &IdleHint) -> RunResult<()> {
        match hint {
            IdleHint::Wait => Ok(()),
            IdleHint::Park => {
                let travel = self.actuator.park().await.map_err(RunError::Actuator)?;
                debug!(position = %self.actuator.position(), travel_ms = travel.as_millis() as u64, "parked");
                Ok(())
            }
            IdleHint::Prime { source } => self.prime(source).await,
            IdleHint::Stage { station, source } => {
                let (primed, offset) = {
                    let s = self
                        .pool
                        .get(source)
                        .map_err(|e| RunError::InvalidRecipe(e.to_string()))?;
                    (s.is_primed(), s.offset)
                };
                if !primed && self.actuator.can_prime() {
                    match self.prime(source).await {
                        Err(RunError::Actuator(ActuatorError::Driver(DriverError::Unsupported(
                            _,
                        )))) => {
                            debug!(source = %source, "driver cannot prime, staging position only");
                        }
                        other => other?,
                    }
                }
                let idx = self.station_index(station)?;
                let target = self.stations[idx].position.minus(&offset);
                let start = Instant::now();
                self.actuator
                    .align_to(target)
                    .await
                    .map_err(|e| RunError::from_align(station, e))?;
                let event = self.timeline.span(Lane::Run, "stage", start, Instant::now());
                event.station = Some(station.clone());
                event.detail = Some(source.to_string());
                info!(station = %station, source = %source, "staged for next dispatch");
                Ok(())
            }
        }
    }

    async fn prime(&mut self, id: &SourceId) -> RunResult<()> {
        let source = self
            .pool
            .get_mut(id)
            .map_err(|e| RunError::InvalidRecipe(e.to_string()))?;
        self.actuator.prime(source).await.map_err(RunError::Actuator)?;
        info!(source = %id, "primed while idle");
        Ok(())
    }

    /// Sleep one poll interval, waking early for a process completion or
    /// an operator signal.
    async fn idle_wait(&mut self, deadline: Option<Instant>) -> RunResult<()> {
        let wake = Instant::now() + self.settings.poll_interval;
        let until = deadline.map_or(wake, |d| d.min(wake));
        let mut stop_rx = self.stop_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep_until(until) => Ok(()),
            Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                self.on_joined(joined)
            }
            _ = stop_rx.changed() => Ok(()),
        }
    }

    /// Wait for every in-flight process (sequential mode).
    async fn await_in_flight(&mut self, deadline: Option<Instant>) -> Option<LoopExit> {
        let mut stop_rx = self.stop_rx.clone();
        while !self.in_flight.is_empty() {
            tokio::select! {
                Some(joined) = self.in_flight.join_next() => {
                    if let Err(e) = self.on_joined(joined) {
                        return Some(LoopExit::from_error(e));
                    }
                }
                _ = sleep_until_deadline(deadline) => {
                    warn!(run_id = %self.run_id, "experiment timeout reached");
                    return Some(LoopExit::TimedOut);
                }
                _ = stop_rx.changed() => {
                    if let Some(exit) = self.check_stop(deadline) {
                        return Some(exit);
                    }
                }
            }
        }
        None
    }

    /// Collect every process that has already finished.
    fn reap(&mut self) -> RunResult<()> {
        while let Some(joined) = self.in_flight.try_join_next() {
            self.on_joined(joined)?;
        }
        Ok(())
    }

    fn on_joined(&mut self, joined: Result<Completion, JoinError>) -> RunResult<()> {
        let done = match joined {
            Ok(done) => done,
            Err(e) => {
                warn!(error = %e, "local process task ended abnormally");
                return Ok(());
            }
        };
        let station = done.station.clone();
        let event = self.timeline.span(
            Lane::Station(station.id.clone()),
            "process",
            done.started,
            done.finished,
        );
        event.station = Some(station.id.clone());
        event.task = Some(done.task.seq);

        match done.result {
            Ok(report) => {
                info!(
                    station = %station.id,
                    task = done.task.seq,
                    took_ms = report.finished.saturating_duration_since(report.started).as_millis() as u64,
                    "local process finished"
                );
                Ok(())
            }
            Err(error) => {
                event.detail = Some(error.to_string());
                let error = RunError::ProcessFailed {
                    station: station.id.clone(),
                    seq: done.task.seq,
                    error,
                };
                station.mark_idle();
                if error.severity() == Severity::Run {
                    error!(station = %station.id, error = %error, "station fault");
                    return Err(error);
                }
                self.task_failed(&station, done.task, &error);
                Ok(())
            }
        }
    }

    // ── Draining / cleanup ─────────────────────────────────────────

    async fn drain(&mut self, mut forced: bool) {
        if forced {
            self.halt_everything().await;
        }
        if self.in_flight.is_empty() {
            return;
        }
        info!(in_flight = self.in_flight.len(), "draining local processes");
        let deadline = Instant::now() + self.settings.drain_timeout;
        let mut stop_rx = self.stop_rx.clone();
        while !self.in_flight.is_empty() {
            tokio::select! {
                Some(joined) = self.in_flight.join_next() => {
                    if let Err(e) = self.on_joined(joined) {
                        warn!(error = %e, "process failed while draining");
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        remaining = self.in_flight.len(),
                        timeout = ?self.settings.drain_timeout,
                        "drain timeout, abandoning local processes"
                    );
                    self.in_flight.abort_all();
                    break;
                }
                _ = force_requested(&mut stop_rx), if !forced => {
                    forced = true;
                    self.halt_everything().await;
                }
            }
        }
        for station in &self.stations {
            station.mark_complete_if_drained();
        }
    }

    async fn halt_everything(&mut self) {
        warn!(run_id = %self.run_id, "aborting local processes and halting actuator");
        if let Err(e) = self.station_driver.abort().await {
            warn!(error = %e, "station abort failed");
        }
        match self.actuator.halt().await {
            Ok(()) => {}
            Err(ActuatorError::Driver(DriverError::Unsupported(_))) => {
                debug!("driver cannot halt");
            }
            Err(e) => warn!(error = %e, "actuator halt failed"),
        }
    }

    /// Park, optionally empty and rinse the sources, and persist the final
    /// state.
    /// With `motion` false (setup failure) nothing moves.
    async fn cleanup(&mut self, motion: bool) {
        if motion {
            if self.actuator.is_busy() {
                if let Err(e) = self.actuator.halt().await {
                    warn!(error = %e, "actuator halt failed");
                }
            }
            if self.settings.empty_on_cleanup || self.settings.rinse_on_cleanup {
                let dump_at = self.settings.dump_at.unwrap_or(self.actuator.rest());
                for id in self.pool.ids() {
                    let Ok(source) = self.pool.get_mut(&id) else {
                        continue;
                    };
                    let mut result = self.actuator.empty(source, dump_at).await;
                    if result.is_ok() && self.settings.rinse_on_cleanup {
                        result = self
                            .actuator
                            .rinse(source, self.settings.rinse_cycles, dump_at)
                            .await;
                    }
                    if let Err(e) = result {
                        warn!(source = %id, error = %e, "failed to empty or rinse source");
                        if e.is_fatal() {
                            break;
                        }
                    }
                }
            }
            match self.actuator.park().await {
                Ok(_) => info!(position = %self.actuator.position(), "actuator parked"),
                Err(e) => warn!(error = %e, "failed to park actuator"),
            }
        }
        self.emit_snapshot(SnapshotKind::Teardown, None);
    }

    fn finish(mut self, outcome: RunOutcome, error: Option<RunError>) -> RunReport {
        let ended = Instant::now();
        self.record_run(Some(&outcome));
        self.timeline.absorb_actuator(self.actuator.history());

        let stations = self
            .stations
            .iter()
            .zip(&self.ledger)
            .map(|(station, ledger)| StationSummary {
                state: station.state(),
                remaining: station.queue_len(),
                busy_ms: station.busy_time().as_millis() as u64,
                completed_ms: station.completed_at().map(|at| self.timeline.offset_ms(at)),
                ..ledger.clone()
            })
            .collect();
        let summary = RunSummary {
            run_id: self.run_id.clone(),
            experiment: self.experiment.clone(),
            policy: self.policy.name().to_string(),
            outcome,
            elapsed_ms: self.timeline.offset_ms(ended),
            stations,
            dispatch_order: std::mem::take(&mut self.dispatch_order),
            resources: self.pool.levels(),
        };
        info!(
            run_id = %summary.run_id,
            outcome = %summary.outcome,
            elapsed = %format_elapsed(summary.elapsed()),
            "run finished"
        );
        RunReport {
            phase: self.phase,
            summary,
            timeline: self.timeline,
            error,
        }
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn set_phase(&mut self, phase: RunPhase) {
        if self.phase != phase {
            info!(
                run_id = %self.run_id,
                from = self.phase.as_str(),
                to = phase.as_str(),
                "phase transition"
            );
        }
        self.phase = phase;
        self.timeline.mark(phase.as_str(), Instant::now());
    }

    fn station_index(&self, id: &StationId) -> RunResult<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| RunError::InvalidRecipe(format!("unknown station {id}")))
    }

    fn emit_snapshot(&mut self, kind: SnapshotKind, at: Option<(StationId, usize)>) {
        let (station_id, task_index) = at.unzip();
        let snapshot = StateSnapshot {
            run_id: self.run_id.clone(),
            seq: self.snapshot_seq,
            kind,
            station_id,
            task_index,
            resource_levels: self.pool.levels(),
            actuator_position: self.actuator.position(),
            elapsed_ms: self.timeline.offset_ms(Instant::now()),
            recorded_at: now_millis(),
        };
        self.snapshot_seq += 1;
        if let Err(e) = self.sink.record(&snapshot) {
            warn!(error = %e, ?kind, "failed to persist snapshot");
        }
    }

    fn record_run(&self, outcome: Option<&RunOutcome>) {
        let record = RunRecord {
            run_id: self.run_id.clone(),
            experiment: self.experiment.clone(),
            policy: self.policy.name().to_string(),
            started_at: self.started_wall,
            finished_at: outcome.map(|_| now_millis()),
            outcome: outcome.map(|o| o.as_str().to_string()),
        };
        if let Err(e) = self.sink.record_run(&record) {
            warn!(error = %e, "failed to persist run record");
        }
    }
}

/// Resolves once a force stop is requested.
async fn force_requested(rx: &mut watch::Receiver<StopSignal>) {
    if rx.wait_for(|s| *s == StopSignal::Force).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
