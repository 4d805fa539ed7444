//! Sequential: one station at a time, in scan order.
//!
//! The run loop waits for each local process before asking again, so the
//! whole run is totally ordered. Used as the reference the concurrent
//! policies are checked against.

use crate::decision::{IdleHint, ScheduleDecision, Snapshot, decide_head};
use crate::policy::SchedulePolicy;

#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl SchedulePolicy for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn next(&self, snapshot: &Snapshot) -> ScheduleDecision {
        snapshot
            .stations
            .iter()
            .find(|s| !s.is_complete())
            .filter(|s| s.is_ready())
            .and_then(|s| decide_head(&snapshot.pool, s))
            .unwrap_or(ScheduleDecision::Idle(IdleHint::Wait))
    }

    fn waits_for_completion(&self) -> bool {
        true
    }
}
