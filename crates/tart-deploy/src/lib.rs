//! tart-deploy — turns a received push into a running tart.
//!
//! # Architecture
//!
//! ```text
//! DeployPipeline (holds the tart's lock for the whole deploy)
//!   ├── TreeMaterializer: bare repository → deployment directory + commit info
//!   ├── TartStore: record last_hash / last_git_message
//!   ├── tartconfig: optional setup script, output streamed to the pusher
//!   └── Supervisor: replace the instance if it was running before the push
//! ```

pub mod git;
pub mod pipeline;
pub mod script;

pub use git::{CommitInfo, GitCheckout, TreeMaterializer};
pub use pipeline::{DeployPipeline, DeployReport};
pub use script::{ScriptOutcome, TARTCONFIG, run_tartconfig};
