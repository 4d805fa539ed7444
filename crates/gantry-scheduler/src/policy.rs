//! The policy seam and the factory that picks one at construction time.

use std::time::Duration;

use gantry_core::PolicyKind;

use crate::decision::{ScheduleDecision, Snapshot};
use crate::preemptive::Preemptive;
use crate::scanning::Scanning;
use crate::sequential::Sequential;

/// Decides what the actuator does next.
///
/// Implementations are pure: the same snapshot always yields the same
/// decision, and nothing in the snapshot is mutated.
pub trait SchedulePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn next(&self, snapshot: &Snapshot) -> ScheduleDecision;

    /// Whether the run loop must wait for each local process to finish
    /// before asking for the next decision.
    fn waits_for_completion(&self) -> bool {
        false
    }
}

pub fn build_policy(kind: PolicyKind, lookahead: Duration) -> Box<dyn SchedulePolicy> {
    match kind {
        PolicyKind::Sequential => Box::new(Sequential),
        PolicyKind::Scanning => Box::new(Scanning),
        PolicyKind::Preemptive => Box::new(Preemptive::new(lookahead)),
    }
}
