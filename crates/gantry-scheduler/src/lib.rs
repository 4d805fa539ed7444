//! gantry-scheduler: decides which station the shared actuator serves next.
//!
//! Policies are pure functions of a [`Snapshot`]. All mutation (dequeue,
//! transfer, state flips) happens in the run loop after a decision is
//! returned.
//!
//! - **`sequential`**: one station at a time; the reference ordering
//! - **`scanning`**: round-robin admission, prime and park when all busy
//! - **`preemptive`**: admission first, then look-ahead staging toward the
//!   earliest-completing station

pub mod decision;
pub mod policy;
pub mod preemptive;
pub mod scanning;
pub mod sequential;

pub use decision::{IdleHint, ScheduleDecision, SkipReason, Snapshot, infeasibility};
pub use policy::{SchedulePolicy, build_policy};
pub use preemptive::Preemptive;
pub use scanning::Scanning;
pub use sequential::Sequential;
