use gantry_actuator::{ActuatorError, PoolError};
use gantry_core::{DriverError, Position, RecipeError, StationId};
use gantry_station::QueueError;
use thiserror::Error;

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Found while preparing; nothing has moved yet.
    Setup,
    /// Only the current task attempt is lost.
    Task,
    /// The run cannot continue.
    Run,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("insufficient resource: {0}")]
    InsufficientResource(#[source] PoolError),

    #[error("invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("station {station}: target {target} is outside the travel bounds")]
    RangeExceeded { station: StationId, target: Position },

    #[error("station {station}: alignment failed: {error}")]
    MotionFailed {
        station: StationId,
        error: DriverError,
    },

    #[error("station {station}: transfer failed: {reason}")]
    TransferFailed { station: StationId, reason: String },

    #[error("station {station} task {seq}: local process failed: {error}")]
    ProcessFailed {
        station: StationId,
        seq: usize,
        error: DriverError,
    },

    #[error("actuator: {0}")]
    Actuator(#[source] ActuatorError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("force stop requested")]
    ForceStopped,
}

impl RunError {
    pub fn severity(&self) -> Severity {
        match self {
            RunError::InsufficientResource(_)
            | RunError::InvalidRecipe(_)
            | RunError::DriverUnavailable(_) => Severity::Setup,
            RunError::RangeExceeded { .. }
            | RunError::TransferFailed { .. }
            | RunError::Queue(_) => Severity::Task,
            RunError::MotionFailed { error, .. } | RunError::ProcessFailed { error, .. } => {
                if error.is_fatal() {
                    Severity::Run
                } else {
                    Severity::Task
                }
            }
            RunError::Actuator(e) => {
                if e.is_fatal() || matches!(e, ActuatorError::Busy) {
                    Severity::Run
                } else {
                    Severity::Task
                }
            }
            RunError::ForceStopped => Severity::Run,
        }
    }

    /// Classify an alignment failure for `station`.
    pub(crate) fn from_align(station: &StationId, error: ActuatorError) -> Self {
        match error {
            ActuatorError::RangeExceeded { target } => RunError::RangeExceeded {
                station: station.clone(),
                target,
            },
            ActuatorError::Driver(error) => RunError::MotionFailed {
                station: station.clone(),
                error,
            },
            other => RunError::Actuator(other),
        }
    }

    /// Classify a transfer failure for `station`.
    pub(crate) fn from_transfer(station: &StationId, error: ActuatorError) -> Self {
        match error {
            ActuatorError::Driver(e) if e.is_fatal() => RunError::Actuator(ActuatorError::Driver(e)),
            ActuatorError::Busy => RunError::Actuator(ActuatorError::Busy),
            other => RunError::TransferFailed {
                station: station.clone(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<RecipeError> for RunError {
    fn from(e: RecipeError) -> Self {
        RunError::InvalidRecipe(e.to_string())
    }
}

pub type RunResult<T> = Result<T, RunError>;
