//! Supervisor — start and stop tart processes and persist the outcome.
//!
//! The public `start`/`stop` take the tart's lock themselves. The
//! `*_locked` variants take a [`TartLock`] and exist for callers that
//! already hold it (deploys, the sentry, the registry).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tart_core::{ServerConfig, push_url};
use tart_state::{Tart, TartStore};
use tracing::{debug, info, warn};

use crate::error::{TartError, TartResult};
use crate::locks::{LockRegistry, TartLock};
use crate::process::{self, ProcessHandle, SpawnSpec, Termination};

/// Filesystem layout and timing the supervisor needs.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub deployment_path: PathBuf,
    pub logs_dir: PathBuf,
    pub startup_script: String,
    pub stop_grace: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            deployment_path: config.deployment_path.clone(),
            logs_dir: config.logs_dir(),
            startup_script: config.startup_script.clone(),
            stop_grace: config.stop_grace(),
        }
    }

    pub fn deployment_dir(&self, push_url: &str) -> PathBuf {
        self.deployment_path.join(push_url::relative_path(push_url))
    }

    pub fn log_file(&self, push_url: &str) -> PathBuf {
        self.logs_dir
            .join(format!("{}.log", push_url::flat_name(push_url)))
    }
}

pub struct Supervisor {
    store: Arc<dyn TartStore>,
    locks: LockRegistry,
    /// Processes spawned this session: push_url → handle.
    handles: Mutex<HashMap<String, ProcessHandle>>,
    settings: SupervisorSettings,
}

impl Supervisor {
    pub fn new(store: Arc<dyn TartStore>, settings: SupervisorSettings) -> Self {
        Self {
            store,
            locks: LockRegistry::new(),
            handles: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn TartStore> {
        &self.store
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Take the lock that serializes every state change of one tart.
    pub async fn lock(&self, push_url: &str) -> TartLock {
        self.locks.acquire(push_url).await
    }

    /// Take the tart's lock if it is free, without waiting.
    pub fn try_lock(&self, push_url: &str) -> Option<TartLock> {
        self.locks.try_acquire(push_url)
    }

    /// Release the lock of a tart whose record is gone.
    pub fn retire_lock(&self, lock: TartLock) {
        self.locks.retire(lock);
    }

    /// Start a tart. Returns the new PID.
    pub async fn start(&self, push_url: &str) -> TartResult<u32> {
        let lock = self.lock(push_url).await;
        self.start_locked(&lock).await
    }

    /// Stop a tart. Any pending sentry restart is cancelled by the
    /// running flag going false.
    pub async fn stop(&self, push_url: &str) -> TartResult<()> {
        let lock = self.lock(push_url).await;
        self.stop_locked(&lock).await
    }

    pub async fn start_locked(&self, lock: &TartLock) -> TartResult<u32> {
        let push_url = lock.push_url();
        let mut tart = self.load(push_url)?;
        if tart.is_running && self.is_live(&tart) {
            return Err(TartError::AlreadyRunning(push_url.to_string()));
        }

        let working_dir = self.settings.deployment_dir(push_url);
        if !working_dir.join(&self.settings.startup_script).is_file() {
            return Err(TartError::ExecutionFailed(format!(
                "No {} in the deployment for {push_url}. Push code before starting.",
                self.settings.startup_script
            )));
        }

        let spec = SpawnSpec {
            working_dir,
            script: self.settings.startup_script.clone(),
            env: tart
                .env_pairs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            log_file: tart.log_stdout.then(|| self.settings.log_file(push_url)),
        };
        let handle = ProcessHandle::spawn(&spec).map_err(|e| {
            TartError::ExecutionFailed(format!("Failed to start {push_url}: {e}"))
        })?;
        let pid = handle.pid();

        tart.mark_running(pid, handle.started_at());
        if let Err(e) = self.store.save(&tart) {
            warn!(%push_url, pid, error = %e, "failed to persist started tart, terminating it");
            handle.terminate(self.settings.stop_grace).await;
            return Err(e.into());
        }
        self.put_handle(push_url, handle);

        info!(%push_url, pid, log_stdout = tart.log_stdout, "tart started");
        Ok(pid)
    }

    pub async fn stop_locked(&self, lock: &TartLock) -> TartResult<()> {
        let push_url = lock.push_url();
        let mut tart = self.load(push_url)?;
        if !tart.is_running {
            return Err(TartError::NotRunning(push_url.to_string()));
        }

        let outcome = self.terminate(&tart).await;
        tart.mark_stopped();
        self.store.save(&tart)?;

        info!(%push_url, ?outcome, "tart stopped");
        Ok(())
    }

    /// Replace a running instance with a fresh one.
    pub async fn restart_locked(&self, lock: &TartLock) -> TartResult<u32> {
        match self.stop_locked(lock).await {
            Ok(()) | Err(TartError::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }
        self.start_locked(lock).await
    }

    /// Record that a tart's process is gone without trying to revive it.
    pub fn mark_stopped_locked(&self, lock: &TartLock) -> TartResult<()> {
        let push_url = lock.push_url();
        let mut tart = self.load(push_url)?;
        tart.mark_stopped();
        self.store.save(&tart)?;
        self.take_handle(push_url);
        debug!(%push_url, "tart marked stopped");
        Ok(())
    }

    /// Whether the tart's recorded PID is a live process we started.
    ///
    /// Never trusts `is_running` alone.
    pub fn is_live(&self, tart: &Tart) -> bool {
        let Some(pid) = tart.pid else {
            return false;
        };
        {
            let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = handles.get(&tart.push_url) {
                if handle.pid() == pid {
                    return handle.is_alive();
                }
            }
        }
        process::probe(pid, tart.pid_started_at)
    }

    /// Signal the tracked process and wait for it, whichever session spawned it.
    async fn terminate(&self, tart: &Tart) -> Termination {
        let grace = self.settings.stop_grace;
        match (self.take_handle(&tart.push_url), tart.pid) {
            (Some(handle), Some(pid)) if handle.pid() == pid => handle.terminate(grace).await,
            (_, Some(pid)) => process::terminate_pid(pid, tart.pid_started_at, grace).await,
            (_, None) => Termination::AlreadyExited,
        }
    }

    fn load(&self, push_url: &str) -> TartResult<Tart> {
        self.store
            .get(push_url)?
            .ok_or_else(|| TartError::NotFound(push_url.to_string()))
    }

    fn put_handle(&self, push_url: &str, handle: ProcessHandle) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.insert(push_url.to_string(), handle);
    }

    fn take_handle(&self, push_url: &str) -> Option<ProcessHandle> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.remove(push_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tart_state::StateStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<dyn TartStore>,
        supervisor: Supervisor,
    }

    fn fixture(push_url: &str, startup: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = SupervisorSettings {
            deployment_path: dir.path().join("deployments"),
            logs_dir: dir.path().join("logs"),
            startup_script: "startup.sh".to_string(),
            stop_grace: Duration::from_secs(5),
        };
        let deploy_dir = settings.deployment_dir(push_url);
        std::fs::create_dir_all(&deploy_dir).unwrap();
        std::fs::write(deploy_dir.join("startup.sh"), startup).unwrap();

        let store: Arc<dyn TartStore> = Arc::new(StateStore::open_in_memory().unwrap());
        store.save(&Tart::placeholder(push_url, "alice")).unwrap();
        let supervisor = Supervisor::new(store.clone(), settings);
        Fixture {
            _dir: dir,
            store,
            supervisor,
        }
    }

    #[tokio::test]
    async fn start_persists_pid_and_running_flag() {
        let fx = fixture("/app", "exec sleep 30\n");
        let pid = fx.supervisor.start("/app").await.unwrap();

        let tart = fx.store.get("/app").unwrap().unwrap();
        assert!(tart.is_running);
        assert_eq!(tart.pid, Some(pid));
        assert!(fx.supervisor.is_live(&tart));

        fx.supervisor.stop("/app").await.unwrap();
    }

    #[tokio::test]
    async fn second_start_is_already_running() {
        let fx = fixture("/app", "exec sleep 30\n");
        let pid = fx.supervisor.start("/app").await.unwrap();

        let err = fx.supervisor.start("/app").await.unwrap_err();
        assert!(matches!(err, TartError::AlreadyRunning(_)));
        assert_eq!(fx.store.get("/app").unwrap().unwrap().pid, Some(pid));

        fx.supervisor.stop("/app").await.unwrap();
    }

    #[tokio::test]
    async fn stop_clears_state_and_rejects_repeat() {
        let fx = fixture("/app", "exec sleep 30\n");
        let pid = fx.supervisor.start("/app").await.unwrap();
        fx.supervisor.stop("/app").await.unwrap();

        let tart = fx.store.get("/app").unwrap().unwrap();
        assert!(!tart.is_running);
        assert_eq!(tart.pid, None);
        assert!(!process::probe(pid, None));

        let err = fx.supervisor.stop("/app").await.unwrap_err();
        assert!(matches!(err, TartError::NotRunning(_)));
    }

    #[tokio::test]
    async fn stale_running_flag_does_not_block_start() {
        let fx = fixture("/app", "exec sleep 30\n");
        let mut tart = fx.store.get("/app").unwrap().unwrap();
        // A PID that cannot exist: left behind by a crashed session.
        tart.mark_running(u32::MAX - 1, None);
        fx.store.save(&tart).unwrap();

        let pid = fx.supervisor.start("/app").await.unwrap();
        assert_ne!(pid, u32::MAX - 1);
        fx.supervisor.stop("/app").await.unwrap();
    }

    #[tokio::test]
    async fn stop_tolerates_dead_process() {
        let fx = fixture("/app", "exit 0\n");
        fx.supervisor.start("/app").await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let tart = fx.store.get("/app").unwrap().unwrap();
        assert!(tart.is_running);
        assert!(!fx.supervisor.is_live(&tart));

        fx.supervisor.stop("/app").await.unwrap();
        assert!(!fx.store.get("/app").unwrap().unwrap().is_running);
    }

    #[tokio::test]
    async fn unknown_tart_is_not_found() {
        let fx = fixture("/app", "exec sleep 30\n");
        assert!(matches!(
            fx.supervisor.start("/missing").await,
            Err(TartError::NotFound(_))
        ));
        assert!(matches!(
            fx.supervisor.stop("/missing").await,
            Err(TartError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_startup_script_is_execution_failure() {
        let fx = fixture("/app", "exec sleep 30\n");
        fx.store.save(&Tart::placeholder("/empty", "alice")).unwrap();

        let err = fx.supervisor.start("/empty").await.unwrap_err();
        assert!(matches!(err, TartError::ExecutionFailed(_)));
        assert!(!fx.store.get("/empty").unwrap().unwrap().is_running);
    }

    #[tokio::test]
    async fn restart_replaces_the_process() {
        let fx = fixture("/app", "exec sleep 30\n");
        let first = fx.supervisor.start("/app").await.unwrap();

        let lock = fx.supervisor.lock("/app").await;
        let second = fx.supervisor.restart_locked(&lock).await.unwrap();
        drop(lock);

        assert_ne!(first, second);
        assert!(!process::probe(first, None));
        fx.supervisor.stop("/app").await.unwrap();
    }
}
