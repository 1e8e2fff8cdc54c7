//! tart-state — durable tart records for pushtart.
//!
//! Backed by [redb](https://docs.rs/redb). Every [`Tart`] is JSON-serialized
//! into a single table keyed by its push URL, and every save commits its own
//! write transaction, so a returned `Ok` means the record is on disk.
//!
//! # Architecture
//!
//! ```text
//! TartStore (trait: all / get / exists / save / delete)
//!   └── StateStore (redb, on-disk or in-memory backend)
//!         └── TARTS table: push_url → JSON(Tart)
//! ```
//!
//! Components receive an `Arc<dyn TartStore>` instead of reaching for a
//! global, which lets tests run against the in-memory backend.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StateStore, TartStore};
pub use types::{Tart, env_key};
