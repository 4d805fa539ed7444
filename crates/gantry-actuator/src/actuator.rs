//! The single shared actuator.
//!
//! Every physical operation takes `&mut self`, so the owner (the run loop)
//! is the only caller and operations are totally ordered. The `busy` flag
//! covers the one case ownership cannot: an operation whose future was
//! dropped mid-flight. The actuator then refuses further work until
//! [`SharedActuator::halt`] has stopped the hardware.

use std::sync::Arc;
use std::time::Duration;

use gantry_core::{ActuatorConfig, DriverError, DriverResult, Position, StationId, TravelBounds};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::driver::ActuatorDriver;
use crate::pool::{PoolError, Source};

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("target {target} is outside the travel bounds")]
    RangeExceeded { target: Position },

    #[error("actuator is busy with an unfinished operation")]
    Busy,

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("actuator driver: {0}")]
    Driver(#[from] DriverError),
}

impl ActuatorError {
    /// Whether the actuator can no longer be trusted for this run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ActuatorError::Driver(e) if e.is_fatal())
    }
}

pub type ActuatorResult<T> = Result<T, ActuatorError>;

/// Speed model used when the driver has no travel estimate of its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionProfile {
    /// mm/s
    pub speed: f64,
    pub overhead: Duration,
    pub bounds: Option<TravelBounds>,
}

impl MotionProfile {
    pub fn from_config(config: &ActuatorConfig) -> Self {
        Self {
            speed: config.speed,
            overhead: config.overhead,
            bounds: config.bounds,
        }
    }

    /// `|to - from| / speed + overhead`, saturating at `Duration::MAX`.
    ///
    /// Speeds are validated when the recipe loads; a profile built by hand
    /// with a non-positive speed never reaches a target.
    pub fn travel_time(&self, from: Position, to: Position) -> Duration {
        let distance = from.distance_to(&to);
        if distance == 0.0 {
            return self.overhead;
        }
        let moving = if self.speed > 0.0 {
            Duration::try_from_secs_f64(distance / self.speed).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        };
        moving.saturating_add(self.overhead)
    }

    pub fn allows(&self, target: &Position) -> bool {
        match &self.bounds {
            Some(bounds) => bounds.contains(target),
            None => target.is_finite(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Align,
    Transfer,
    Prime,
    Fill,
    Cycle,
    Empty,
    Rinse,
    Home,
    Halt,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Align => "align",
            OpKind::Transfer => "transfer",
            OpKind::Prime => "prime",
            OpKind::Fill => "fill",
            OpKind::Cycle => "cycle",
            OpKind::Empty => "empty",
            OpKind::Rinse => "rinse",
            OpKind::Home => "home",
            OpKind::Halt => "halt",
        }
    }
}

/// A completed actuator operation and the interval it occupied. Failed
/// operations leave no record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpRecord {
    pub kind: OpKind,
    pub start: Instant,
    pub end: Instant,
}

/// Read-only copy of the actuator state for scheduling policies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorView {
    pub position: Position,
    pub busy: bool,
    /// Cleared once the driver reports that it cannot prime.
    pub can_prime: bool,
}

pub struct SharedActuator {
    driver: Arc<dyn ActuatorDriver>,
    profile: MotionProfile,
    position: Position,
    rest: Position,
    busy: bool,
    can_prime: bool,
    history: Vec<OpRecord>,
}

impl SharedActuator {
    pub fn new(driver: Arc<dyn ActuatorDriver>, profile: MotionProfile, rest: Position) -> Self {
        Self {
            driver,
            profile,
            position: rest,
            rest,
            busy: false,
            can_prime: true,
            history: Vec::new(),
        }
    }

    pub fn from_config(driver: Arc<dyn ActuatorDriver>, config: &ActuatorConfig) -> Self {
        Self::new(driver, MotionProfile::from_config(config), config.rest)
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn rest(&self) -> Position {
        self.rest
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    /// False once a prime was refused as unsupported.
    pub fn can_prime(&self) -> bool {
        self.can_prime
    }

    pub fn profile(&self) -> &MotionProfile {
        &self.profile
    }

    pub fn history(&self) -> &[OpRecord] {
        &self.history
    }

    pub fn view(&self) -> ActuatorView {
        ActuatorView {
            position: self.position,
            busy: self.busy,
            can_prime: self.can_prime,
        }
    }

    /// Take the position from a saved run without moving.
    pub fn assume_position(&mut self, position: Position) {
        self.position = position;
    }

    /// Travel time for a move from the current position.
    pub fn travel_time_to(&self, target: Position) -> Duration {
        if self.position.coincides_with(&target) {
            return Duration::ZERO;
        }
        self.driver
            .estimate_travel_time(self.position, target)
            .unwrap_or_else(|| self.profile.travel_time(self.position, target))
    }

    /// Move to `target`, blocking until the predicted travel time has passed
    /// since the command was issued. A driver that already blocks for the
    /// motion only leaves the remainder to wait out. Returns the time spent.
    pub async fn align_to(&mut self, target: Position) -> ActuatorResult<Duration> {
        if !self.profile.allows(&target) {
            warn!(target = %target, "alignment outside travel bounds");
            return Err(ActuatorError::RangeExceeded { target });
        }
        self.ensure_idle()?;
        if self.position.coincides_with(&target) {
            return Ok(Duration::ZERO);
        }

        let travel = self.travel_time_to(target);
        debug!(from = %self.position, to = %target, travel_ms = travel.as_millis() as u64, "aligning");
        let start = self.begin();
        let moved = self.driver.move_to(target).await;
        if moved.is_ok() {
            tokio::time::sleep(travel.saturating_sub(start.elapsed())).await;
            self.position = target;
        }
        self.finish(OpKind::Align, start, moved)?;
        Ok(start.elapsed())
    }

    /// Withdraw `amount` from `source` into `station`.
    ///
    /// Pool bounds are checked before the driver is called, so a rejected
    /// transfer issues no physical command.
    pub async fn transfer(
        &mut self,
        amount: f64,
        source: &mut Source,
        station: &StationId,
    ) -> ActuatorResult<()> {
        self.ensure_idle()?;
        source.check_withdraw(amount)?;
        if amount == 0.0 {
            debug!(source = %source.id, station = %station, "nothing to transfer");
            return Ok(());
        }

        let start = self.begin();
        let result = self.driver.dispense(&source.id, amount).await;
        self.finish(OpKind::Transfer, start, result)?;

        source.withdraw(amount)?;
        source.set_primed(false);
        debug!(
            source = %source.id,
            station = %station,
            amount,
            remaining = source.volume(),
            "transferred"
        );
        Ok(())
    }

    /// Prime the source's line in place.
    ///
    /// An `Unsupported` answer from the driver is remembered, and later
    /// snapshots report `can_prime = false` so nothing asks again.
    pub async fn prime(&mut self, source: &mut Source) -> ActuatorResult<()> {
        self.ensure_idle()?;
        let start = self.begin();
        let result = self.driver.prime(&source.id).await;
        if matches!(result, Err(DriverError::Unsupported(_))) && self.can_prime {
            info!("driver cannot prime; priming disabled for this run");
            self.can_prime = false;
        }
        self.finish(OpKind::Prime, start, result)?;
        source.set_primed(true);
        debug!(source = %source.id, "primed");
        Ok(())
    }

    /// Align the source's nozzle with `fill_at` and draw `amount` into it.
    ///
    /// `prewet_cycles` draw-and-return cycles of `amount` run first to wet
    /// the line. A driver without cycle support skips them.
    pub async fn fill(
        &mut self,
        source: &mut Source,
        amount: f64,
        fill_at: Position,
        prewet_cycles: u32,
    ) -> ActuatorResult<()> {
        source.check_deposit(amount)?;
        self.align_to(fill_at.minus(&source.offset)).await?;

        for cycle in 0..prewet_cycles {
            match self.cycle(source, amount).await {
                Ok(()) => {}
                Err(ActuatorError::Driver(DriverError::Unsupported(_))) => {
                    debug!(source = %source.id, "driver cannot cycle; skipping prewet");
                    break;
                }
                Err(e) => return Err(e),
            }
            debug!(source = %source.id, cycle = cycle + 1, "prewet");
        }

        let start = self.begin();
        let result = self.driver.aspirate(&source.id, amount).await;
        self.finish(OpKind::Fill, start, result)?;

        source.deposit(amount)?;
        source.set_primed(false);
        info!(source = %source.id, amount, volume = source.volume(), "filled");
        Ok(())
    }

    /// Align the source's nozzle with `dump_at` and empty it.
    pub async fn empty(&mut self, source: &mut Source, dump_at: Position) -> ActuatorResult<()> {
        self.align_to(dump_at.minus(&source.offset)).await?;

        let start = self.begin();
        let result = self.driver.empty(&source.id).await;
        self.finish(OpKind::Empty, start, result)?;

        source.set_volume(0.0)?;
        source.set_primed(false);
        info!(source = %source.id, "emptied");
        Ok(())
    }

    /// Align the source's nozzle with `at` and flush the line `cycles` times,
    /// each cycle drawing the source's free headroom and returning it.
    pub async fn rinse(
        &mut self,
        source: &mut Source,
        cycles: u32,
        at: Position,
    ) -> ActuatorResult<()> {
        let amount = source.headroom();
        if cycles == 0 || amount <= 0.0 {
            return Ok(());
        }
        self.align_to(at.minus(&source.offset)).await?;

        let start = self.begin();
        let mut result = Ok(());
        for _ in 0..cycles {
            result = self.driver.cycle(&source.id, amount).await;
            if result.is_err() {
                break;
            }
        }
        self.finish(OpKind::Rinse, start, result)?;

        source.set_primed(false);
        info!(source = %source.id, cycles, "rinsed");
        Ok(())
    }

    /// Draw `amount` into the source and push it straight back out.
    async fn cycle(&mut self, source: &Source, amount: f64) -> ActuatorResult<()> {
        self.ensure_idle()?;
        let start = self.begin();
        let result = self.driver.cycle(&source.id, amount).await;
        self.finish(OpKind::Cycle, start, result)
    }

    pub async fn home(&mut self) -> ActuatorResult<Position> {
        self.ensure_idle()?;
        let start = self.begin();
        let result = self.driver.home().await;
        let home = self.finish(OpKind::Home, start, result)?;
        self.position = home;
        info!(position = %home, "homed");
        Ok(home)
    }

    /// Return to the rest position.
    pub async fn park(&mut self) -> ActuatorResult<Duration> {
        self.align_to(self.rest).await
    }

    /// Stop any motion and clear the busy flag left by an interrupted
    /// operation. The position is kept as last confirmed.
    pub async fn halt(&mut self) -> ActuatorResult<()> {
        let start = Instant::now();
        let result = self.driver.halt().await;
        self.finish(OpKind::Halt, start, result)?;
        warn!(position = %self.position, "actuator halted");
        Ok(())
    }

    fn ensure_idle(&self) -> ActuatorResult<()> {
        if self.busy {
            return Err(ActuatorError::Busy);
        }
        Ok(())
    }

    fn begin(&mut self) -> Instant {
        self.busy = true;
        Instant::now()
    }

    /// Release the actuator and record the operation if the driver
    /// completed it.
    fn finish<T>(
        &mut self,
        kind: OpKind,
        start: Instant,
        result: DriverResult<T>,
    ) -> ActuatorResult<T> {
        self.busy = false;
        let value = result?;
        self.history.push(OpRecord {
            kind,
            start,
            end: Instant::now(),
        });
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{SimActuator, SimCommand};
    use gantry_core::SourceId;

    fn actuator(sim: &SimActuator, bounds: Option<TravelBounds>) -> SharedActuator {
        let profile = MotionProfile {
            speed: 250.0,
            overhead: Duration::from_secs(2),
            bounds,
        };
        SharedActuator::new(Arc::new(sim.clone()), profile, Position::ORIGIN)
    }

    fn source(volume: f64) -> Source {
        Source::new(SourceId::new("s0"), 100.0, volume).unwrap()
    }

    /// A driver that can only move and dispense.
    struct MotionOnly;

    impl ActuatorDriver for MotionOnly {
        fn move_to(&self, _target: Position) -> gantry_core::DriverFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
        fn dispense<'a>(
            &'a self,
            _source: &'a SourceId,
            _amount: f64,
        ) -> gantry_core::DriverFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }
        fn is_connected(&self) -> bool {
            true
        }
    }

    fn motion_only() -> SharedActuator {
        SharedActuator::new(
            Arc::new(MotionOnly),
            MotionProfile {
                speed: 100.0,
                overhead: Duration::ZERO,
                bounds: None,
            },
            Position::ORIGIN,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn align_blocks_for_distance_over_speed_plus_overhead() {
        let sim = SimActuator::new();
        let mut act = actuator(&sim, None);
        let t0 = Instant::now();
        let travel = act.align_to(Position::on_track(-250.0)).await.unwrap();
        assert_eq!(travel, Duration::from_secs(3));
        assert_eq!(Instant::now() - t0, Duration::from_secs(3));
        assert_eq!(act.position(), Position::on_track(-250.0));
        assert_eq!(sim.commands(), vec![SimCommand::MoveTo(Position::on_track(-250.0))]);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_driver_is_not_charged_travel_twice() {
        let sim = SimActuator::with_latency(Duration::from_secs(3));
        let mut act = actuator(&sim, None);
        let t0 = Instant::now();
        let spent = act.align_to(Position::on_track(-250.0)).await.unwrap();
        assert_eq!(Instant::now() - t0, Duration::from_secs(3));
        assert_eq!(spent, Duration::from_secs(3));

        // A driver slower than the model sets the pace on its own.
        let sim = SimActuator::with_latency(Duration::from_secs(5));
        let mut act = actuator(&sim, None);
        let t0 = Instant::now();
        act.align_to(Position::on_track(-250.0)).await.unwrap();
        assert_eq!(Instant::now() - t0, Duration::from_secs(5));
    }

    #[test]
    fn travel_time_saturates_instead_of_panicking() {
        let far = Position::on_track(-470.0);
        let crawl = MotionProfile {
            speed: 1e-18,
            overhead: Duration::from_secs(2),
            bounds: None,
        };
        assert_eq!(crawl.travel_time(Position::ORIGIN, far), Duration::MAX);

        let stopped = MotionProfile { speed: 0.0, ..crawl };
        assert_eq!(stopped.travel_time(Position::ORIGIN, far), Duration::MAX);
        assert_eq!(stopped.travel_time(far, far), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn align_to_current_position_is_free() {
        let sim = SimActuator::new();
        let mut act = actuator(&sim, None);
        let travel = act.align_to(Position::ORIGIN).await.unwrap();
        assert_eq!(travel, Duration::ZERO);
        assert_eq!(sim.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_estimate_overrides_profile() {
        let sim = SimActuator::with_fixed_travel(Duration::from_secs(1));
        let mut act = actuator(&sim, None);
        let travel = act.align_to(Position::on_track(-400.0)).await.unwrap();
        assert_eq!(travel, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_bounds_is_rejected_before_motion() {
        let sim = SimActuator::new();
        let bounds = TravelBounds {
            min: Position::on_track(-470.0),
            max: Position::ORIGIN,
        };
        let mut act = actuator(&sim, Some(bounds));
        let err = act.align_to(Position::on_track(-500.0)).await.unwrap_err();
        assert!(matches!(err, ActuatorError::RangeExceeded { .. }));
        assert_eq!(sim.call_count(), 0);
        assert_eq!(act.position(), Position::ORIGIN);
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_withdraws_and_clears_primed() {
        let sim = SimActuator::new();
        let mut act = actuator(&sim, None);
        let mut s = source(100.0);
        act.prime(&mut s).await.unwrap();
        assert!(s.is_primed());

        act.transfer(50.0, &mut s, &StationId::new("A")).await.unwrap();
        assert_eq!(s.volume(), 50.0);
        assert!(!s.is_primed());
        assert!(!act.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_transfer_issues_no_command() {
        let sim = SimActuator::new();
        let mut act = actuator(&sim, None);
        let mut s = source(20.0);
        let err = act
            .transfer(30.0, &mut s, &StationId::new("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::Pool(PoolError::Insufficient { .. })));
        assert_eq!(sim.call_count(), 0);
        assert_eq!(s.volume(), 20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dispense_keeps_volume_and_releases_actuator() {
        let sim = SimActuator::new();
        sim.inject_fault(
            0,
            |c| matches!(c, SimCommand::Dispense(..)),
            DriverError::Rejected("clog".into()),
        );
        let mut act = actuator(&sim, None);
        let mut s = source(100.0);
        let err = act
            .transfer(10.0, &mut s, &StationId::new("A"))
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(s.volume(), 100.0);
        assert!(!act.is_busy());
        assert!(act.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_prime_is_remembered_and_not_recorded() {
        let mut act = motion_only();
        let mut s = source(100.0);
        assert!(act.view().can_prime);

        let err = act.prime(&mut s).await.unwrap_err();
        assert!(matches!(
            err,
            ActuatorError::Driver(DriverError::Unsupported("prime"))
        ));
        assert!(!s.is_primed());
        assert!(!act.can_prime());
        assert!(!act.view().can_prime);
        assert!(act.history().is_empty());
        assert!(!act.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn other_prime_failures_keep_priming_enabled() {
        let sim = SimActuator::new();
        sim.inject_fault(
            0,
            |c| matches!(c, SimCommand::Prime(_)),
            DriverError::Rejected("air bubble".into()),
        );
        let mut act = actuator(&sim, None);
        let mut s = source(100.0);
        assert!(act.prime(&mut s).await.is_err());
        assert!(act.can_prime());
        act.prime(&mut s).await.unwrap();
        assert!(s.is_primed());
        assert_eq!(act.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_operation_leaves_busy_until_halt() {
        let sim = SimActuator::with_latency(Duration::from_secs(10));
        let mut act = actuator(&sim, None);
        let interrupted =
            tokio::time::timeout(Duration::from_secs(1), act.align_to(Position::on_track(-100.0)))
                .await;
        assert!(interrupted.is_err());
        assert!(act.is_busy());

        let mut s = source(100.0);
        let err = act
            .transfer(1.0, &mut s, &StationId::new("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::Busy));

        act.halt().await.unwrap();
        assert!(!act.is_busy());
        assert_eq!(act.position(), Position::ORIGIN);
    }

    #[tokio::test(start_paused = true)]
    async fn fill_and_empty_use_source_offset() {
        let sim = SimActuator::new();
        let mut act = actuator(&sim, None);
        let mut s = source(0.0);
        s.offset = Position::on_track(-100.0);

        act.fill(&mut s, 60.0, Position::on_track(-20.0), 0).await.unwrap();
        assert_eq!(s.volume(), 60.0);
        assert_eq!(act.position(), Position::on_track(80.0));

        let err = act.fill(&mut s, 50.0, Position::ORIGIN, 0).await.unwrap_err();
        assert!(matches!(err, ActuatorError::Pool(PoolError::OverCapacity { .. })));

        act.empty(&mut s, Position::on_track(-20.0)).await.unwrap();
        assert_eq!(s.volume(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn prewet_cycles_run_before_the_fill() {
        let sim = SimActuator::new();
        let mut act = actuator(&sim, None);
        let mut s = source(0.0);
        act.fill(&mut s, 40.0, Position::ORIGIN, 2).await.unwrap();
        assert_eq!(s.volume(), 40.0);

        let s0 = SourceId::new("s0");
        assert_eq!(
            sim.commands(),
            vec![
                SimCommand::Cycle(s0.clone(), 40.0),
                SimCommand::Cycle(s0.clone(), 40.0),
                SimCommand::Aspirate(s0, 40.0),
            ]
        );
        let kinds: Vec<OpKind> = act.history().iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![OpKind::Cycle, OpKind::Cycle, OpKind::Fill]);
    }

    #[tokio::test(start_paused = true)]
    async fn prewet_is_skipped_without_cycle_support() {
        struct NoCycle(SimActuator);
        impl ActuatorDriver for NoCycle {
            fn move_to(&self, target: Position) -> gantry_core::DriverFuture<'_, ()> {
                self.0.move_to(target)
            }
            fn dispense<'a>(
                &'a self,
                source: &'a SourceId,
                amount: f64,
            ) -> gantry_core::DriverFuture<'a, ()> {
                self.0.dispense(source, amount)
            }
            fn is_connected(&self) -> bool {
                true
            }
            fn aspirate<'a>(
                &'a self,
                source: &'a SourceId,
                amount: f64,
            ) -> gantry_core::DriverFuture<'a, ()> {
                self.0.aspirate(source, amount)
            }
        }

        let sim = SimActuator::new();
        let mut act = SharedActuator::new(
            Arc::new(NoCycle(sim.clone())),
            MotionProfile {
                speed: 100.0,
                overhead: Duration::ZERO,
                bounds: None,
            },
            Position::ORIGIN,
        );
        let mut s = source(0.0);
        act.fill(&mut s, 40.0, Position::ORIGIN, 3).await.unwrap();
        assert_eq!(s.volume(), 40.0);
        assert_eq!(
            sim.commands(),
            vec![SimCommand::Aspirate(SourceId::new("s0"), 40.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rinse_flushes_full_capacity_at_the_dump() {
        let sim = SimActuator::new();
        let mut act = actuator(&sim, None);
        let mut s = source(30.0);
        s.offset = Position::on_track(-100.0);
        let dump = Position::on_track(-120.0);

        act.empty(&mut s, dump).await.unwrap();
        act.rinse(&mut s, 3, dump).await.unwrap();

        let s0 = SourceId::new("s0");
        let cycles: Vec<SimCommand> = sim
            .commands()
            .into_iter()
            .filter(|c| matches!(c, SimCommand::Cycle(..)))
            .collect();
        assert_eq!(cycles, vec![SimCommand::Cycle(s0, 100.0); 3]);
        assert_eq!(act.position(), Position::on_track(-20.0));
        assert_eq!(s.volume(), 0.0);
        assert_eq!(act.history().last().map(|r| r.kind), Some(OpKind::Rinse));
    }

    #[tokio::test(start_paused = true)]
    async fn rinse_without_cycle_support_fails_cleanly() {
        let mut act = motion_only();
        let mut s = source(0.0);
        let err = act.rinse(&mut s, 3, Position::ORIGIN).await.unwrap_err();
        assert!(matches!(
            err,
            ActuatorError::Driver(DriverError::Unsupported("cycle"))
        ));
        assert!(!act.is_busy());
        assert!(act.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn history_intervals_never_overlap() {
        let sim = SimActuator::with_latency(Duration::from_millis(200));
        let mut act = actuator(&sim, None);
        let mut s = source(100.0);
        for x in [-100.0, -200.0, -300.0] {
            act.align_to(Position::on_track(x)).await.unwrap();
            act.transfer(10.0, &mut s, &StationId::new("A")).await.unwrap();
        }
        act.park().await.unwrap();

        let history = act.history();
        assert_eq!(history.len(), 7);
        for pair in history.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn home_without_driver_support() {
        let mut act = motion_only();
        let err = act.home().await.unwrap_err();
        assert!(matches!(
            err,
            ActuatorError::Driver(DriverError::Unsupported("home"))
        ));
        assert!(!act.is_busy());
        assert!(act.history().is_empty());
    }
}
