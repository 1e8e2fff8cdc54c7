//! tart-commands — the text command surface of pushtart.
//!
//! The transport hands over `(command, params, sink, username)`. This crate
//! turns the string map into a typed [`Request`] first, so nothing past
//! parsing ever looks up a key by name, then resolves the tart, checks
//! ownership and delegates to the registry, pipeline or stats collector.
//! Every outcome is written to the sink as plain lines; errors start with
//! `Err:`.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator::dispatch(command, params, sink, username)
//!   ├── Request::parse → USAGE / Err lines on bad input
//!   └── Orchestrator::execute(Request, Principal)
//!         ├── TartRegistry   (new, start, stop, edit, owners, delete)
//!         ├── DeployPipeline (pre_git_receive, digest, deploy)
//!         └── StatsCollector (tart-stats)
//! ```

pub mod handlers;
pub mod requests;

pub use handlers::{CommandOutcome, Orchestrator};
pub use requests::{COMMANDS, CommandKind, CommandSpec, Params, Request, RequestError};
