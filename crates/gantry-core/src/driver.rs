//! Error and future types shared by the actuator and station driver seams.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Failure reported by a hardware driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The device stopped answering (serial link dropped, socket closed).
    #[error("device disconnected: {0}")]
    Disconnected(String),

    /// The device reported an unrecoverable hardware fault.
    #[error("hardware fault: {0}")]
    Fault(String),

    /// The device refused a single command; it is still usable.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// The driver does not implement this operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

impl DriverError {
    /// Whether the failure leaves the device unusable for the rest of the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Disconnected(_) | DriverError::Fault(_))
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Boxed future returned by driver trait methods.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = DriverResult<T>> + Send + 'a>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(DriverError::Disconnected("COM8".into()).is_fatal());
        assert!(DriverError::Fault("stall".into()).is_fatal());
        assert!(!DriverError::Rejected("bad volume".into()).is_fatal());
        assert!(!DriverError::Unsupported("home").is_fatal());
    }
}
