//! Scanning: round-robin admission over the stations in index order.
//!
//! The first Idle station with a queued task gets the actuator. When every
//! remaining station is Busy the actuator primes the sources upcoming
//! work needs, then parks.

use crate::decision::{IdleHint, ScheduleDecision, Snapshot, admit_first_ready};
use crate::policy::SchedulePolicy;

#[derive(Debug, Clone, Copy, Default)]
pub struct Scanning;

impl SchedulePolicy for Scanning {
    fn name(&self) -> &'static str {
        "scanning"
    }

    fn next(&self, snapshot: &Snapshot) -> ScheduleDecision {
        admit_first_ready(snapshot).unwrap_or_else(|| ScheduleDecision::Idle(housekeeping(snapshot)))
    }
}

/// Prime what the queued heads need, then return to rest.
pub(crate) fn housekeeping(snapshot: &Snapshot) -> IdleHint {
    if snapshot.all_complete() {
        return IdleHint::Wait;
    }
    if let Some(source) = snapshot.unprimed_sources().into_iter().next() {
        return IdleHint::Prime { source };
    }
    park_or_wait(snapshot)
}

pub(crate) fn park_or_wait(snapshot: &Snapshot) -> IdleHint {
    if snapshot.actuator.position.coincides_with(&snapshot.rest) {
        IdleHint::Wait
    } else {
        IdleHint::Park
    }
}
