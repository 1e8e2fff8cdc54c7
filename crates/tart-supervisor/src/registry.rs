//! Ownership-gated changes to tart records.
//!
//! Every method re-reads the tart under its lock, authorizes the caller
//! against that fresh copy, then mutates and persists before releasing.

use std::sync::Arc;

use tart_core::{Principal, validate_push_url};
use tart_state::{Tart, TartStore};
use tracing::info;

use crate::auth::{authorize, is_owner};
use crate::error::{TartError, TartResult};
use crate::locks::TartLock;
use crate::supervisor::Supervisor;

/// Optional edits applied by `edit-tart`. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditRequest {
    pub name: Option<String>,
    /// `KEY=VALUE`; replaces any existing entry for `KEY`.
    pub set_env: Option<String>,
    pub delete_env: Option<String>,
    pub log_stdout: Option<bool>,
}

/// Crash-recovery policy applied by `tart-restart-mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub enabled: bool,
    /// Leaves the current delay untouched when `None`.
    pub lull_period_secs: Option<u64>,
}

#[derive(Clone)]
pub struct TartRegistry {
    supervisor: Arc<Supervisor>,
}

impl TartRegistry {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    fn store(&self) -> &Arc<dyn TartStore> {
        self.supervisor.store()
    }

    pub fn list(&self) -> TartResult<Vec<Tart>> {
        Ok(self.store().all()?)
    }

    /// Find a tart by exact push URL, falling back to `/` + `name`.
    pub fn resolve(&self, name: &str) -> TartResult<Tart> {
        if let Some(tart) = self.store().get(name)? {
            return Ok(tart);
        }
        if !name.starts_with('/') {
            if let Some(tart) = self.store().get(&format!("/{name}"))? {
                return Ok(tart);
            }
        }
        Err(TartError::NotFound(name.to_string()))
    }

    /// Create a stopped placeholder owned by `owner`.
    pub async fn create(&self, push_url: &str, owner: &str) -> TartResult<Tart> {
        validate_push_url(push_url).map_err(|e| TartError::InvalidArgument(e.to_string()))?;
        if owner.is_empty() {
            return Err(TartError::InvalidArgument(
                "A tart needs an owner.".to_string(),
            ));
        }
        let _lock = self.supervisor.lock(push_url).await;
        if self.store().exists(push_url)? {
            return Err(TartError::AlreadyExists(push_url.to_string()));
        }
        let tart = Tart::placeholder(push_url, owner);
        self.store().save(&tart)?;
        info!(%push_url, %owner, "tart created");
        Ok(tart)
    }

    pub async fn start(&self, principal: &Principal, push_url: &str) -> TartResult<u32> {
        let lock = self.authorized_lock(principal, push_url).await?;
        self.supervisor.start_locked(&lock).await
    }

    pub async fn stop(&self, principal: &Principal, push_url: &str) -> TartResult<()> {
        let lock = self.authorized_lock(principal, push_url).await?;
        self.supervisor.stop_locked(&lock).await
    }

    /// Apply an edit. Changes reach the process on its next start.
    pub async fn edit(
        &self,
        principal: &Principal,
        push_url: &str,
        edit: &EditRequest,
    ) -> TartResult<Tart> {
        if let Some(entry) = &edit.set_env {
            if tart_state::env_key(entry).is_none() {
                return Err(TartError::InvalidArgument(format!(
                    "set-env expects KEY=VALUE, got {entry:?}"
                )));
            }
        }
        self.mutate(principal, push_url, |tart| {
            if let Some(name) = &edit.name {
                tart.name = name.clone();
            }
            if let Some(entry) = &edit.set_env {
                tart.set_env(entry);
            }
            if let Some(key) = &edit.delete_env {
                tart.delete_env(key);
            }
            if let Some(log_stdout) = edit.log_stdout {
                tart.log_stdout = log_stdout;
            }
            Ok(())
        })
        .await
    }

    pub async fn set_restart_policy(
        &self,
        principal: &Principal,
        push_url: &str,
        policy: RestartPolicy,
    ) -> TartResult<Tart> {
        self.mutate(principal, push_url, |tart| {
            tart.restart_on_stop = policy.enabled;
            if let Some(secs) = policy.lull_period_secs {
                tart.restart_delay_secs = secs;
            }
            Ok(())
        })
        .await
    }

    pub async fn add_owner(
        &self,
        principal: &Principal,
        push_url: &str,
        username: &str,
    ) -> TartResult<Tart> {
        if username.is_empty() {
            return Err(TartError::InvalidArgument(
                "username must not be empty".to_string(),
            ));
        }
        self.mutate(principal, push_url, |tart| {
            if is_owner(username, &tart.owners) {
                return Err(TartError::InvalidArgument(format!(
                    "{username} is already set as an owner."
                )));
            }
            tart.owners.push(username.to_string());
            Ok(())
        })
        .await
    }

    pub async fn remove_owner(
        &self,
        principal: &Principal,
        push_url: &str,
        username: &str,
    ) -> TartResult<Tart> {
        self.mutate(principal, push_url, |tart| {
            if !is_owner(username, &tart.owners) {
                return Err(TartError::InvalidArgument(
                    "That user is not a tart owner.".to_string(),
                ));
            }
            if tart.owners.len() == 1 {
                return Err(TartError::LastOwner);
            }
            tart.owners.retain(|owner| owner != username);
            Ok(())
        })
        .await
    }

    /// Stop the tart if it runs, then drop its record.
    pub async fn delete(&self, principal: &Principal, push_url: &str) -> TartResult<()> {
        let lock = self.authorized_lock(principal, push_url).await?;
        match self.supervisor.stop_locked(&lock).await {
            Ok(()) | Err(TartError::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }
        self.store().delete(push_url)?;
        self.supervisor.retire_lock(lock);
        info!(%push_url, by = %principal, "tart deleted");
        Ok(())
    }

    /// Take the tart's lock and check the caller against the current owners.
    pub async fn authorized_lock(
        &self,
        principal: &Principal,
        push_url: &str,
    ) -> TartResult<TartLock> {
        let lock = self.supervisor.lock(push_url).await;
        let tart = self.load(push_url)?;
        authorize(principal, &tart)?;
        Ok(lock)
    }

    async fn mutate<F>(&self, principal: &Principal, push_url: &str, apply: F) -> TartResult<Tart>
    where
        F: FnOnce(&mut Tart) -> TartResult<()>,
    {
        let _lock = self.supervisor.lock(push_url).await;
        let mut tart = self.load(push_url)?;
        authorize(principal, &tart)?;
        apply(&mut tart)?;
        self.store().save(&tart)?;
        info!(%push_url, by = %principal, "tart updated");
        Ok(tart)
    }

    fn load(&self, push_url: &str) -> TartResult<Tart> {
        self.store()
            .get(push_url)?
            .ok_or_else(|| TartError::NotFound(push_url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tart_state::StateStore;

    use crate::supervisor::SupervisorSettings;

    fn registry() -> (tempfile::TempDir, TartRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let settings = SupervisorSettings {
            deployment_path: dir.path().join("deployments"),
            logs_dir: dir.path().join("logs"),
            startup_script: "startup.sh".to_string(),
            stop_grace: Duration::from_secs(5),
        };
        let store: Arc<dyn TartStore> = Arc::new(StateStore::open_in_memory().unwrap());
        let supervisor = Arc::new(Supervisor::new(store, settings));
        (dir, TartRegistry::new(supervisor))
    }

    fn alice() -> Principal {
        Principal::User("alice".into())
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_bad_urls() {
        let (_dir, reg) = registry();
        let tart = reg.create("/app", "alice").await.unwrap();
        assert_eq!(tart.owners, vec!["alice"]);

        assert!(matches!(
            reg.create("/app", "bob").await,
            Err(TartError::AlreadyExists(_))
        ));
        assert!(matches!(
            reg.create("app", "bob").await,
            Err(TartError::InvalidArgument(_))
        ));
        assert!(matches!(
            reg.create("/app/", "bob").await,
            Err(TartError::InvalidArgument(_))
        ));
        assert_eq!(reg.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolve_accepts_alias_without_slash() {
        let (_dir, reg) = registry();
        reg.create("/blog", "alice").await.unwrap();
        assert_eq!(reg.resolve("/blog").unwrap().push_url, "/blog");
        assert_eq!(reg.resolve("blog").unwrap().push_url, "/blog");
        assert!(matches!(reg.resolve("nope"), Err(TartError::NotFound(_))));
    }

    #[tokio::test]
    async fn edit_applies_only_given_fields() {
        let (_dir, reg) = registry();
        reg.create("/app", "alice").await.unwrap();

        let edit = EditRequest {
            set_env: Some("PORT=8080".into()),
            log_stdout: Some(true),
            ..Default::default()
        };
        reg.edit(&alice(), "/app", &edit).await.unwrap();
        let edit = EditRequest {
            set_env: Some("PORT=9090".into()),
            ..Default::default()
        };
        let tart = reg.edit(&alice(), "/app", &edit).await.unwrap();

        assert_eq!(tart.env, vec!["PORT=9090"]);
        assert!(tart.log_stdout);
        assert_eq!(tart.name, "app");
    }

    #[tokio::test]
    async fn edit_rejects_malformed_env() {
        let (_dir, reg) = registry();
        reg.create("/app", "alice").await.unwrap();
        let edit = EditRequest {
            set_env: Some("PORT".into()),
            ..Default::default()
        };
        assert!(matches!(
            reg.edit(&alice(), "/app", &edit).await,
            Err(TartError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn non_owner_cannot_mutate() {
        let (_dir, reg) = registry();
        reg.create("/app", "alice").await.unwrap();
        let bob = Principal::User("bob".into());

        let edit = EditRequest {
            name: Some("hijacked".into()),
            ..Default::default()
        };
        assert!(matches!(
            reg.edit(&bob, "/app", &edit).await,
            Err(TartError::Unauthorized(_))
        ));
        assert!(matches!(
            reg.stop(&bob, "/app").await,
            Err(TartError::Unauthorized(_))
        ));
        assert_eq!(reg.resolve("/app").unwrap().name, "app");
    }

    #[tokio::test]
    async fn owner_management_keeps_invariants() {
        let (_dir, reg) = registry();
        reg.create("/app", "alice").await.unwrap();

        assert!(matches!(
            reg.remove_owner(&alice(), "/app", "alice").await,
            Err(TartError::LastOwner)
        ));
        assert!(matches!(
            reg.add_owner(&alice(), "/app", "alice").await,
            Err(TartError::InvalidArgument(_))
        ));

        let tart = reg.add_owner(&alice(), "/app", "bob").await.unwrap();
        assert_eq!(tart.owners, vec!["alice", "bob"]);
        assert!(matches!(
            reg.remove_owner(&alice(), "/app", "carol").await,
            Err(TartError::InvalidArgument(_))
        ));
        let tart = reg.remove_owner(&alice(), "/app", "alice").await.unwrap();
        assert_eq!(tart.owners, vec!["bob"]);
    }

    #[tokio::test]
    async fn restart_policy_keeps_delay_when_unset() {
        let (_dir, reg) = registry();
        reg.create("/app", "alice").await.unwrap();
        let policy = RestartPolicy {
            enabled: true,
            lull_period_secs: Some(5),
        };
        reg.set_restart_policy(&Principal::Trusted, "/app", policy)
            .await
            .unwrap();
        let policy = RestartPolicy {
            enabled: false,
            lull_period_secs: None,
        };
        let tart = reg
            .set_restart_policy(&Principal::Trusted, "/app", policy)
            .await
            .unwrap();
        assert!(!tart.restart_on_stop);
        assert_eq!(tart.restart_delay_secs, 5);
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let (_dir, reg) = registry();
        reg.create("/app", "alice").await.unwrap();
        reg.delete(&alice(), "/app").await.unwrap();
        assert!(matches!(reg.resolve("/app"), Err(TartError::NotFound(_))));

        // The name is free again, lock included.
        reg.create("/app", "bob").await.unwrap();
        let lock = reg.supervisor().try_lock("/app");
        assert!(lock.is_some());
    }
}
