//! gantry-station: stations, their task queues, and the drivers that run
//! station-local processes.

pub mod process;
pub mod station;

pub use process::{ProcessReport, ProcessResult, ProcessSpec, SimStation, StationDriver};
pub use station::{QueueError, QueueResult, Station, StationState, StationView, TaskQueue};
