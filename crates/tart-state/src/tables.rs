//! redb table definitions for the tart store.

use redb::TableDefinition;

/// Tart records keyed by push URL (`/blog`, `/team/api`).
pub const TARTS: TableDefinition<&str, &[u8]> = TableDefinition::new("tarts");
