//! Actuator driver seam and the simulated gantry used for dry runs and tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use gantry_core::{DriverError, DriverFuture, Position, SourceId};
use tokio::time::Instant;

/// Commands the run loop needs from the motion hardware.
///
/// Implementations talk to real devices (serial G-code, sockets). The run
/// loop never calls two of these concurrently.
pub trait ActuatorDriver: Send + Sync {
    /// Start a move to `target`. The actuator waits out whatever remains of
    /// the predicted travel time once this resolves, so a driver may return
    /// as soon as the command is accepted or after the motion completes.
    fn move_to(&self, target: Position) -> DriverFuture<'_, ()>;

    fn dispense<'a>(&'a self, source: &'a SourceId, amount: f64) -> DriverFuture<'a, ()>;

    /// Travel time the hardware predicts for a move. `None` lets the caller
    /// fall back to its own speed model.
    fn estimate_travel_time(&self, _from: Position, _to: Position) -> Option<Duration> {
        None
    }

    fn is_connected(&self) -> bool;

    fn prime<'a>(&'a self, _source: &'a SourceId) -> DriverFuture<'a, ()> {
        Box::pin(async { Err(DriverError::Unsupported("prime")) })
    }

    fn aspirate<'a>(&'a self, _source: &'a SourceId, _amount: f64) -> DriverFuture<'a, ()> {
        Box::pin(async { Err(DriverError::Unsupported("aspirate")) })
    }

    fn empty<'a>(&'a self, _source: &'a SourceId) -> DriverFuture<'a, ()> {
        Box::pin(async { Err(DriverError::Unsupported("empty")) })
    }

    /// Draw `amount` and dispense it straight back. Used for prewetting and
    /// rinsing; the source volume is unchanged.
    fn cycle<'a>(&'a self, _source: &'a SourceId, _amount: f64) -> DriverFuture<'a, ()> {
        Box::pin(async { Err(DriverError::Unsupported("cycle")) })
    }

    /// Run the homing cycle and report where the head ended up.
    fn home(&self) -> DriverFuture<'_, Position> {
        Box::pin(async { Err(DriverError::Unsupported("home")) })
    }

    /// Stop whatever motion is in progress.
    fn halt(&self) -> DriverFuture<'_, ()> {
        Box::pin(async { Err(DriverError::Unsupported("halt")) })
    }
}

/// A command the simulated actuator received.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    MoveTo(Position),
    Dispense(SourceId, f64),
    Prime(SourceId),
    Aspirate(SourceId, f64),
    Empty(SourceId),
    Cycle(SourceId, f64),
    Home,
    Halt,
}

/// One command with the virtual time it started and finished.
#[derive(Debug, Clone)]
pub struct SimCall {
    pub command: SimCommand,
    pub started: Instant,
    pub finished: Instant,
}

/// A failure to inject into the simulator.
#[derive(Clone)]
pub struct SimFault {
    /// Fail the nth command (0-based) that matches `matches`.
    pub nth: usize,
    pub matches: fn(&SimCommand) -> bool,
    pub error: DriverError,
}

#[derive(Default)]
struct SimState {
    calls: Vec<SimCall>,
    faults: Vec<SimFault>,
    matched: Vec<usize>,
}

struct SimInner {
    state: Mutex<SimState>,
    connected: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    travel_time: Option<Duration>,
    latency: Duration,
    home: Position,
}

/// In-process actuator driver on the tokio clock.
///
/// Cloning shares the same call log, so a test can keep a handle while the
/// run loop owns the driver.
#[derive(Clone)]
pub struct SimActuator {
    inner: Arc<SimInner>,
}

impl Default for SimActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimActuator {
    pub fn new() -> Self {
        Self::build(None, Duration::ZERO)
    }

    /// Report the same travel time for every move regardless of distance.
    pub fn with_fixed_travel(travel: Duration) -> Self {
        Self::build(Some(travel), Duration::ZERO)
    }

    /// Make every command take `latency` of virtual time.
    pub fn with_latency(latency: Duration) -> Self {
        Self::build(None, latency)
    }

    fn build(travel_time: Option<Duration>, latency: Duration) -> Self {
        Self {
            inner: Arc::new(SimInner {
                state: Mutex::new(SimState::default()),
                connected: AtomicBool::new(true),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                travel_time,
                latency,
                home: Position::ORIGIN,
            }),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    /// Fail the `nth` command matching `matches` with `error`.
    pub fn inject_fault(&self, nth: usize, matches: fn(&SimCommand) -> bool, error: DriverError) {
        let mut state = self.state();
        state.faults.push(SimFault {
            nth,
            matches,
            error,
        });
        state.matched.push(0);
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.state().calls.clone()
    }

    pub fn commands(&self) -> Vec<SimCommand> {
        self.state().calls.iter().map(|c| c.command.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Highest number of commands that were ever in progress at once.
    pub fn max_concurrency(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_fault(&self, command: &SimCommand) -> Option<DriverError> {
        let mut state = self.state();
        let SimState {
            faults, matched, ..
        } = &mut *state;
        for (fault, seen) in faults.iter().zip(matched.iter_mut()) {
            if (fault.matches)(command) {
                let hit = *seen == fault.nth;
                *seen += 1;
                if hit {
                    return Some(fault.error.clone());
                }
            }
        }
        None
    }

    async fn execute(&self, command: SimCommand) -> Result<(), DriverError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(DriverError::Disconnected("simulated actuator".into()));
        }
        let now_in_flight = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .max_in_flight
            .fetch_max(now_in_flight, Ordering::SeqCst);

        let started = Instant::now();
        if !self.inner.latency.is_zero() {
            tokio::time::sleep(self.inner.latency).await;
        }
        let result = match self.take_fault(&command) {
            Some(err) => Err(err),
            None => Ok(()),
        };
        let finished = Instant::now();

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.state().calls.push(SimCall {
            command,
            started,
            finished,
        });
        result
    }
}

impl ActuatorDriver for SimActuator {
    fn move_to(&self, target: Position) -> DriverFuture<'_, ()> {
        Box::pin(self.execute(SimCommand::MoveTo(target)))
    }

    fn dispense<'a>(&'a self, source: &'a SourceId, amount: f64) -> DriverFuture<'a, ()> {
        Box::pin(self.execute(SimCommand::Dispense(source.clone(), amount)))
    }

    fn estimate_travel_time(&self, _from: Position, _to: Position) -> Option<Duration> {
        self.inner.travel_time
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn prime<'a>(&'a self, source: &'a SourceId) -> DriverFuture<'a, ()> {
        Box::pin(self.execute(SimCommand::Prime(source.clone())))
    }

    fn aspirate<'a>(&'a self, source: &'a SourceId, amount: f64) -> DriverFuture<'a, ()> {
        Box::pin(self.execute(SimCommand::Aspirate(source.clone(), amount)))
    }

    fn empty<'a>(&'a self, source: &'a SourceId) -> DriverFuture<'a, ()> {
        Box::pin(self.execute(SimCommand::Empty(source.clone())))
    }

    fn cycle<'a>(&'a self, source: &'a SourceId, amount: f64) -> DriverFuture<'a, ()> {
        Box::pin(self.execute(SimCommand::Cycle(source.clone(), amount)))
    }

    fn home(&self) -> DriverFuture<'_, Position> {
        Box::pin(async move {
            self.execute(SimCommand::Home).await?;
            Ok(self.inner.home)
        })
    }

    fn halt(&self) -> DriverFuture<'_, ()> {
        Box::pin(self.execute(SimCommand::Halt))
    }
}
