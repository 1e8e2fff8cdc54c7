//! tart-sentry — keeps "running" tarts honest.
//!
//! One background loop wakes every `run_sentry_interval` seconds and walks
//! the tarts flagged as running. For each it takes the tart's lock,
//! re-reads the record and checks the process is still there. Dead tarts
//! are restarted after their lull period when `restart_on_stop` is set and
//! marked stopped otherwise.
//!
//! # Architecture
//!
//! ```text
//! Sentry::run (select: interval sleep | shutdown)
//!   └── tick
//!         ├── RestartDebounce (first-seen-dead instant per tart)
//!         └── Supervisor (is_live / start_locked / mark_stopped_locked)
//! ```

pub mod debounce;
pub mod sentry;

pub use debounce::RestartDebounce;
pub use sentry::{Sentry, TickReport};
