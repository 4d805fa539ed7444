//! Station-local processes: the driver seam and a simulated station bank.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use gantry_core::{DriverError, DriverFuture, Phase, StationId};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

/// What a station must run after its transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    pub station: StationId,
    pub task_seq: usize,
    pub phases: Vec<Phase>,
}

/// How a local process ended.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessReport {
    pub station: StationId,
    pub task_seq: usize,
    pub started: Instant,
    pub finished: Instant,
}

pub type ProcessResult = Result<ProcessReport, DriverError>;

/// Starts autonomous processes on the stations (spin, cure, incubate).
///
/// One driver serves the whole station bank; `spec.station` selects the
/// device.
pub trait StationDriver: Send + Sync {
    /// Start the process and return immediately. The receiver resolves
    /// once the process has finished or failed.
    fn start_local_process(&self, spec: ProcessSpec) -> oneshot::Receiver<ProcessResult>;

    /// Stop every running process. Used on force stop only.
    fn abort(&self) -> DriverFuture<'_, ()>;

    fn is_connected(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
struct ProcessFault {
    station: StationId,
    task_seq: usize,
    error: DriverError,
}

#[derive(Default)]
struct SimStationState {
    started: Vec<(ProcessSpec, Instant)>,
    finished: Vec<ProcessReport>,
    faults: Vec<ProcessFault>,
}

struct SimStationInner {
    state: Mutex<SimStationState>,
    abort_tx: watch::Sender<bool>,
    connected: AtomicBool,
}

/// Simulated station bank. Each process sleeps through its phases on the
/// tokio clock.
#[derive(Clone)]
pub struct SimStation {
    inner: Arc<SimStationInner>,
}

impl Default for SimStation {
    fn default() -> Self {
        Self::new()
    }
}

impl SimStation {
    pub fn new() -> Self {
        let (abort_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SimStationInner {
                state: Mutex::new(SimStationState::default()),
                abort_tx,
                connected: AtomicBool::new(true),
            }),
        }
    }

    /// Make task `task_seq` on `station` fail after its first phase.
    pub fn fail_process(&self, station: &str, task_seq: usize, error: DriverError) {
        self.state().faults.push(ProcessFault {
            station: station.into(),
            task_seq,
            error,
        });
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    /// Every process started so far, with its start time.
    pub fn started(&self) -> Vec<(ProcessSpec, Instant)> {
        self.state().started.clone()
    }

    pub fn finished(&self) -> Vec<ProcessReport> {
        self.state().finished.clone()
    }

    fn state(&self) -> MutexGuard<'_, SimStationState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_fault(&self, spec: &ProcessSpec) -> Option<DriverError> {
        let mut state = self.state();
        let idx = state
            .faults
            .iter()
            .position(|f| f.station == spec.station && f.task_seq == spec.task_seq)?;
        Some(state.faults.remove(idx).error)
    }
}

impl StationDriver for SimStation {
    fn start_local_process(&self, spec: ProcessSpec) -> oneshot::Receiver<ProcessResult> {
        let (tx, rx) = oneshot::channel();
        let started = Instant::now();
        let fault = self.take_fault(&spec);
        self.state().started.push((spec.clone(), started));

        let sim = self.clone();
        let mut abort_rx = self.inner.abort_tx.subscribe();
        tokio::spawn(async move {
            debug!(station = %spec.station, task = spec.task_seq, "local process started");
            for (i, phase) in spec.phases.iter().enumerate() {
                tokio::select! {
                    _ = tokio::time::sleep(phase.duration) => {}
                    _ = abort_rx.wait_for(|aborted| *aborted) => {
                        warn!(station = %spec.station, phase = %phase.name, "local process aborted");
                        let _ = tx.send(Err(DriverError::Fault("process aborted".into())));
                        return;
                    }
                }
                if let (0, Some(err)) = (i, &fault) {
                    let _ = tx.send(Err(err.clone()));
                    return;
                }
            }
            if let (true, Some(err)) = (spec.phases.is_empty(), fault) {
                let _ = tx.send(Err(err));
                return;
            }

            let report = ProcessReport {
                station: spec.station.clone(),
                task_seq: spec.task_seq,
                started,
                finished: Instant::now(),
            };
            sim.state().finished.push(report.clone());
            let _ = tx.send(Ok(report));
        });
        rx
    }

    fn abort(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            self.inner.abort_tx.send_replace(true);
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}
