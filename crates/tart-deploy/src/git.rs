//! Materializing pushed trees from bare git repositories.

use std::future::Future;
use std::path::{Path, PathBuf};

use tart_core::push_url;
use tart_supervisor::{TartError, TartResult};
use tokio::process::Command;
use tracing::{debug, info};

/// The commit a deployment was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
}

/// Produces a tart's tree in its deployment directory.
pub trait TreeMaterializer: Send + Sync {
    /// Make the repository for `push_url` ready to receive its first push.
    fn prepare(&self, push_url: &str) -> impl Future<Output = TartResult<()>> + Send;

    /// Write the latest pushed tree into `target` and describe its commit.
    fn materialize(
        &self,
        push_url: &str,
        target: &Path,
    ) -> impl Future<Output = TartResult<CommitInfo>> + Send;
}

/// Bare repositories under `repos_dir`, one per push URL.
#[derive(Debug, Clone)]
pub struct GitCheckout {
    repos_dir: PathBuf,
}

impl GitCheckout {
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
        }
    }

    pub fn repository(&self, push_url: &str) -> PathBuf {
        self.repos_dir.join(push_url::relative_path(push_url))
    }
}

impl TreeMaterializer for GitCheckout {
    async fn prepare(&self, push_url: &str) -> TartResult<()> {
        let repo = self.repository(push_url);
        if repo.join("HEAD").is_file() {
            debug!(%push_url, ?repo, "repository already initialised");
            return Ok(());
        }
        std::fs::create_dir_all(&repo).map_err(|e| {
            TartError::ExecutionFailed(format!("Failed to create {}: {e}", repo.display()))
        })?;
        git(Command::new("git").args(["init", "--bare", "--quiet"]).arg(&repo)).await?;
        info!(%push_url, ?repo, "bare repository created");
        Ok(())
    }

    async fn materialize(&self, push_url: &str, target: &Path) -> TartResult<CommitInfo> {
        let repo = self.repository(push_url);
        git(Command::new("git")
            .arg("--git-dir")
            .arg(&repo)
            .arg("--work-tree")
            .arg(target)
            .args(["checkout", "-f"]))
        .await?;
        let log = git(Command::new("git")
            .arg("--git-dir")
            .arg(&repo)
            .args(["log", "-1", "--format=%H%n%B"]))
        .await?;

        let (hash, message) = log.split_once('\n').unwrap_or((log.as_str(), ""));
        Ok(CommitInfo {
            hash: hash.trim().to_string(),
            message: message.trim().to_string(),
        })
    }
}

async fn git(command: &mut Command) -> TartResult<String> {
    let output = command
        .output()
        .await
        .map_err(|e| TartError::ExecutionFailed(format!("Failed to run git: {e}")))?;
    if !output.status.success() {
        return Err(TartError::ExecutionFailed(format!(
            "git failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
