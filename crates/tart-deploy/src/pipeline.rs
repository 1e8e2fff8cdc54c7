//! Deploy pipeline — push received → tree updated → tartconfig → restart.
//!
//! A deploy holds the tart's lock from the checkout until the replacement
//! process is started, so it cannot interleave with a stop, a start or a
//! sentry restart of the same tart.

use std::io::Write;
use std::sync::Arc;

use tart_core::Principal;
use tart_state::Tart;
use tart_supervisor::{Supervisor, TartError, TartResult, TartLock, authorize};
use tracing::{info, warn};

use crate::git::{CommitInfo, TreeMaterializer};
use crate::script::{ScriptOutcome, run_tartconfig};

/// What a deploy did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub commit: CommitInfo,
    pub script: ScriptOutcome,
    /// PID of the replacement instance, when the tart was running.
    pub restarted: Option<u32>,
}

pub struct DeployPipeline<M> {
    supervisor: Arc<Supervisor>,
    materializer: M,
}

impl<M: TreeMaterializer> DeployPipeline<M> {
    pub fn new(supervisor: Arc<Supervisor>, materializer: M) -> Self {
        Self {
            supervisor,
            materializer,
        }
    }

    /// Get a new tart's repository and deployment directory ready for its
    /// first push. Owner-gated like any other mutation.
    pub async fn pre_git_receive(&self, principal: &Principal, push_url: &str) -> TartResult<()> {
        let _lock = self.supervisor.lock(push_url).await;
        let tart = self.load(push_url)?;
        authorize(principal, &tart)?;

        let dir = self.supervisor.settings().deployment_dir(push_url);
        std::fs::create_dir_all(&dir).map_err(|e| {
            TartError::ExecutionFailed(format!("Failed to create {}: {e}", dir.display()))
        })?;
        self.materializer.prepare(push_url).await
    }

    /// Deploy the latest push for `push_url`, streaming progress to `sink`.
    ///
    /// Checkout and bookkeeping failures abort with the previous state
    /// untouched. A failing `tartconfig` is reported and the deploy carries on.
    pub async fn deploy(
        &self,
        principal: &Principal,
        push_url: &str,
        sink: &mut (dyn Write + Send),
    ) -> TartResult<DeployReport> {
        let lock = self.supervisor.lock(push_url).await;
        let mut tart = self.load(push_url)?;
        authorize(principal, &tart)?;
        let was_running = tart.is_running;

        let dir = self.supervisor.settings().deployment_dir(push_url);
        std::fs::create_dir_all(&dir).map_err(|e| {
            TartError::ExecutionFailed(format!("Failed to create {}: {e}", dir.display()))
        })?;
        let commit = self.materializer.materialize(push_url, &dir).await?;

        tart.last_hash = commit.hash.clone();
        tart.last_git_message = commit.message.clone();
        self.supervisor.store().save(&tart)?;
        let _ = writeln!(sink, "Deploying {} ({})", tart.name, short_hash(&commit.hash));
        info!(%push_url, hash = %commit.hash, by = %principal, "tree materialized");

        let script = self.run_script(&tart, sink).await;

        let restarted = if was_running {
            Some(self.replace_instance(&lock, sink).await?)
        } else {
            let _ = writeln!(sink, "Tart is not running; start it with start-tart.");
            None
        };

        Ok(DeployReport {
            commit,
            script,
            restarted,
        })
    }

    /// Re-run `tartconfig` against the current deployment.
    pub async fn digest(
        &self,
        principal: &Principal,
        push_url: &str,
        sink: &mut (dyn Write + Send),
    ) -> TartResult<ScriptOutcome> {
        let _lock = self.supervisor.lock(push_url).await;
        let tart = self.load(push_url)?;
        authorize(principal, &tart)?;
        Ok(self.run_script(&tart, sink).await)
    }

    async fn run_script(&self, tart: &Tart, sink: &mut (dyn Write + Send)) -> ScriptOutcome {
        let dir = self.supervisor.settings().deployment_dir(&tart.push_url);
        let env: Vec<(String, String)> = tart
            .env_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let result = run_tartconfig(&dir, &env, sink).await;
        settle_script(&tart.push_url, result, sink)
    }

    async fn replace_instance(
        &self,
        lock: &TartLock,
        sink: &mut (dyn Write + Send),
    ) -> TartResult<u32> {
        let _ = writeln!(sink, "Restarting...");
        let pid = self.supervisor.restart_locked(lock).await?;
        let _ = writeln!(sink, "Tart restarted (PID {pid}).");
        info!(push_url = %lock.push_url(), pid, "tart replaced after deploy");
        Ok(pid)
    }

    fn load(&self, push_url: &str) -> TartResult<Tart> {
        self.supervisor
            .store()
            .get(push_url)?
            .ok_or_else(|| TartError::NotFound(push_url.to_string()))
    }
}

/// Report a failed or unstartable `tartconfig` to the caller. Neither
/// aborts the deploy.
fn settle_script(
    push_url: &str,
    result: TartResult<ScriptOutcome>,
    sink: &mut (dyn Write + Send),
) -> ScriptOutcome {
    match result {
        Ok(outcome @ ScriptOutcome::Failed { code }) => {
            let _ = match code {
                Some(code) => writeln!(sink, "Err: tartconfig exited with {code}"),
                None => writeln!(sink, "Err: tartconfig was killed by a signal"),
            };
            outcome
        }
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(%push_url, error = %e, "tartconfig could not run");
            let _ = writeln!(sink, "Err: {e}");
            ScriptOutcome::Failed { code: None }
        }
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}
