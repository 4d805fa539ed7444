//! redb table definitions. Values are JSON-serialized records.

use redb::TableDefinition;

/// Run snapshots keyed by `{run_id}:{seq:010}`, so a prefix scan returns a
/// run's snapshots in order.
pub const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

/// Run records keyed by `{run_id}`.
pub const RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");
