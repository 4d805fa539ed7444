//! gantry-actuator: the shared mobile actuator and the resource pool it
//! draws from.
//!
//! The actuator is the serialization point of a run: only one align,
//! transfer, prime, fill or empty is ever in progress. The pool tracks
//! fill levels and refuses any mutation that would leave
//! `0 <= volume <= capacity`.

pub mod actuator;
pub mod driver;
pub mod pool;

pub use actuator::{
    ActuatorError, ActuatorResult, ActuatorView, MotionProfile, OpKind, OpRecord, SharedActuator,
};
pub use driver::{ActuatorDriver, SimActuator, SimCall, SimCommand};
pub use pool::{PoolError, PoolResult, ResourcePool, ResourceView, Source, SourceView};
