//! Preemptive: earliest-completion-first with look-ahead staging.
//!
//! Admission works like Scanning. When every remaining station is Busy,
//! the station with the smallest ETC (ties to the lowest id) among those
//! that still have queued work is the next one to free up. If its ETC is
//! more than `lookahead` away, the actuator primes the source its next
//! task needs (when the driver can prime) and moves over it. The in-flight
//! work is never interrupted.

use std::time::Duration;

use gantry_station::StationView;

use crate::decision::{IdleHint, ScheduleDecision, Snapshot, admit_first_ready, infeasibility};
use crate::policy::SchedulePolicy;
use crate::scanning::park_or_wait;

#[derive(Debug, Clone, Copy)]
pub struct Preemptive {
    lookahead: Duration,
}

impl Preemptive {
    pub fn new(lookahead: Duration) -> Self {
        Self { lookahead }
    }

    pub fn lookahead(&self) -> Duration {
        self.lookahead
    }

    fn stage(&self, snapshot: &Snapshot) -> IdleHint {
        let Some(next) = earliest_completion(&snapshot.stations) else {
            return park_or_wait(snapshot);
        };
        let (Some(etc), Some(task)) = (next.etc, next.head.as_ref()) else {
            return IdleHint::Wait;
        };
        if etc.saturating_duration_since(snapshot.now) <= self.lookahead {
            return IdleHint::Wait;
        }
        if infeasibility(&snapshot.pool, task).is_some() {
            return IdleHint::Wait;
        }
        let Some(source) = snapshot.pool.get(&task.source_id) else {
            return IdleHint::Wait;
        };

        let target = next.position.minus(&source.offset);
        let needs_prime = !source.primed && snapshot.actuator.can_prime;
        if !needs_prime && snapshot.actuator.position.coincides_with(&target) {
            return IdleHint::Wait;
        }
        IdleHint::Stage {
            station: next.id.clone(),
            source: source.id.clone(),
        }
    }
}

impl SchedulePolicy for Preemptive {
    fn name(&self) -> &'static str {
        "preemptive"
    }

    fn next(&self, snapshot: &Snapshot) -> ScheduleDecision {
        admit_first_ready(snapshot).unwrap_or_else(|| ScheduleDecision::Idle(self.stage(snapshot)))
    }
}

/// Busy station with queued work and the smallest ETC; ties go to the
/// lowest id.
fn earliest_completion(stations: &[StationView]) -> Option<&StationView> {
    stations
        .iter()
        .filter(|s| s.is_busy() && s.head.is_some() && s.etc.is_some())
        .min_by(|a, b| a.etc.cmp(&b.etc).then_with(|| a.id.cmp(&b.id)))
}
