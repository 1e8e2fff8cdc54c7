//! StateStore — redb-backed persistence for tart records.
//!
//! Each tart is stored as JSON under its push URL. Every mutation runs in
//! its own write transaction and is durable once `commit` returns.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::TARTS;
use crate::types::Tart;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Storage contract the orchestrator depends on.
///
/// Implementations must make `save` durable before returning and must be
/// safe to share across tasks.
pub trait TartStore: Send + Sync {
    /// Every tart, in push URL order.
    fn all(&self) -> StateResult<Vec<Tart>>;

    fn get(&self, push_url: &str) -> StateResult<Option<Tart>>;

    fn exists(&self, push_url: &str) -> StateResult<bool> {
        Ok(self.get(push_url)?.is_some())
    }

    /// Insert or replace the record stored under `tart.push_url`.
    fn save(&self, tart: &Tart) -> StateResult<()>;

    /// Remove a tart. Returns true if it existed.
    fn delete(&self, push_url: &str) -> StateResult<bool>;
}

/// Thread-safe tart store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "tart store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory tart store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(TARTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl TartStore for StateStore {
    fn all(&self) -> StateResult<Vec<Tart>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let tart: Tart =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(tart);
        }
        Ok(results)
    }

    fn get(&self, push_url: &str) -> StateResult<Option<Tart>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARTS).map_err(map_err!(Table))?;
        match table.get(push_url).map_err(map_err!(Read))? {
            Some(guard) => {
                let tart: Tart =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(tart))
            }
            None => Ok(None),
        }
    }

    fn save(&self, tart: &Tart) -> StateResult<()> {
        let value = serde_json::to_vec(tart).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TARTS).map_err(map_err!(Table))?;
            table
                .insert(tart.push_url.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(push_url = %tart.push_url, running = tart.is_running, "tart stored");
        Ok(())
    }

    fn delete(&self, push_url: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(TARTS).map_err(map_err!(Table))?;
            existed = table.remove(push_url).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%push_url, existed, "tart deleted");
        Ok(existed)
    }
}
