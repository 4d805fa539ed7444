//! gantry-state: run snapshots for persistence and resume.
//!
//! The run loop emits a [`StateSnapshot`] on every dispatch and at
//! teardown (resource levels and actuator position). [`SnapshotStore`]
//! keeps them in [redb](https://docs.rs/redb) so `gantry run --resume`
//! and `gantry status` can read them back.

pub mod error;
pub mod sink;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use sink::{MemorySink, NullSink, SnapshotSink};
pub use store::SnapshotStore;
pub use types::{RunRecord, SnapshotKind, StateSnapshot, new_run_id, now_millis};
