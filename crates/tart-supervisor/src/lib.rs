//! tart-supervisor — owns the OS processes behind tarts.
//!
//! The supervisor is the only component that spawns or signals a tart's
//! process. Everything that changes a tart's running state (commands,
//! deploys, the sentry) goes through it while holding that tart's lock.
//!
//! # Architecture
//!
//! ```text
//! Supervisor
//!   ├── TartStore (read Tart, persist is_running / pid)
//!   ├── LockRegistry (one async mutex per push URL)
//!   └── ProcessHandle per tart spawned this session
//!         ├── process group leader running `sh startup.sh`
//!         └── reaper task publishing the exit status
//!
//! TartRegistry (ownership-gated record edits: new, edit, owners, delete)
//!   └── authorize() before every mutation
//! ```

pub mod auth;
pub mod error;
pub mod locks;
pub mod process;
pub mod registry;
pub mod supervisor;

pub use auth::{authorize, is_owner};
pub use error::{TartError, TartResult};
pub use locks::{LockRegistry, TartLock};
pub use process::{ProcessHandle, SpawnSpec};
pub use registry::{EditRequest, RestartPolicy, TartRegistry};
pub use supervisor::{Supervisor, SupervisorSettings};
