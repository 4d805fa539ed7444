//! gantry-controller: the run loop that drives one shared actuator across
//! many stations.
//!
//! [`Controller`] prepares the run (connectivity, resource demand, homing,
//! auto-fill), asks the configured policy for a decision on every
//! iteration, dispatches, drains in-flight processes and cleans up. A run
//! always ends with a [`RunReport`]: the [`RunSummary`], the activity
//! [`Timeline`], and the error that ended it early if there was one.

pub mod controller;
pub mod error;
pub mod setup;
pub mod summary;
pub mod timeline;

pub use controller::{
    Controller, ControllerHandle, RunPhase, RunReport, RunSettings, StopSignal,
};
pub use error::{RunError, RunResult, Severity};
pub use setup::{SetupReport, validate_loaded, validate_setup};
pub use summary::{
    DispatchRecord, FailedAttempt, RunOutcome, RunSummary, SkippedTask, StationSummary,
};
pub use timeline::{Lane, Timeline, TimelineEvent};
