//! Process handle — spawn, observe and terminate one tart process.
//!
//! Tarts run as `sh <startup script>` in their own process group so a stop
//! reaches everything the script forked. Processes spawned in this session
//! are reaped by a background task that publishes the exit; processes left
//! over from a previous session are probed by PID and start time instead.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How often an adopted process is re-probed while waiting for it to exit.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for the kernel to reap a SIGKILLed group.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Everything needed to launch a tart.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub working_dir: PathBuf,
    /// Script path relative to `working_dir`, run with `/bin/sh`.
    pub script: String,
    /// Overlaid on the daemon's own environment.
    pub env: Vec<(String, String)>,
    /// Append stdout and stderr here; `None` discards them.
    pub log_file: Option<PathBuf>,
}

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    AlreadyExited,
    Graceful,
    Killed,
}

/// What the OS reports about a PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsProcess {
    pub start_time: u64,
    pub zombie: bool,
}

/// A process spawned by this supervisor session.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    started_at: Option<u64>,
    exited: watch::Receiver<bool>,
}

impl ProcessHandle {
    /// Spawn the process and its reaper task. Must run inside a tokio runtime.
    pub fn spawn(spec: &SpawnSpec) -> io::Result<Self> {
        let (stdout, stderr) = match &spec.log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                let err = file.try_clone()?;
                (Stdio::from(file), Stdio::from(err))
            }
            None => (Stdio::null(), Stdio::null()),
        };

        let mut child = Command::new("/bin/sh")
            .arg(&spec.script)
            .current_dir(&spec.working_dir)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("spawned process exited before reporting a pid"))?;
        let started_at = inspect(pid).map(|p| p.start_time);

        let (exit_tx, exit_rx) = watch::channel(false);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(pid, %status, "tart process exited"),
                Err(e) => warn!(pid, error = %e, "failed to wait on tart process"),
            }
            let _ = exit_tx.send(true);
        });

        debug!(pid, dir = ?spec.working_dir, script = %spec.script, "tart process spawned");
        Ok(Self {
            pid,
            started_at,
            exited: exit_rx,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// OS start time in epoch seconds, when the OS reported one.
    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    pub fn is_alive(&self) -> bool {
        !*self.exited.borrow()
    }

    /// Resolve once the reaper has observed the exit.
    pub async fn wait(&self) {
        let mut exited = self.exited.clone();
        let _ = exited.wait_for(|done| *done).await;
    }

    /// SIGTERM the process group, then SIGKILL it if it outlives `grace`.
    pub async fn terminate(&self, grace: Duration) -> Termination {
        if !self.is_alive() {
            return Termination::AlreadyExited;
        }
        if !signal_group(self.pid, Signal::SIGTERM) {
            return Termination::AlreadyExited;
        }
        if tokio::time::timeout(grace, self.wait()).await.is_ok() {
            return Termination::Graceful;
        }
        warn!(pid = self.pid, ?grace, "tart ignored SIGTERM, sending SIGKILL");
        signal_group(self.pid, Signal::SIGKILL);
        let _ = tokio::time::timeout(KILL_WAIT, self.wait()).await;
        Termination::Killed
    }
}

/// Is `pid` a live, non-zombie process that started at `expected_start`?
///
/// PID reuse between two probes is still possible when the OS does not
/// report a start time.
pub fn probe(pid: u32, expected_start: Option<u64>) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match signal::kill(Pid::from_raw(raw), None) {
        // EPERM: the PID exists but belongs to someone else.
        Ok(()) | Err(Errno::EPERM) => {}
        Err(_) => return false,
    }
    match inspect(pid) {
        Some(info) if info.zombie => false,
        Some(info) => expected_start.is_none_or(|start| start == info.start_time),
        None => true,
    }
}

/// Query the OS process table for `pid`.
pub fn inspect(pid: u32) -> Option<OsProcess> {
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system.process(pid).map(|process| OsProcess {
        start_time: process.start_time(),
        zombie: matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
    })
}

/// Terminate a process this session did not spawn, polling for its exit.
pub async fn terminate_pid(pid: u32, expected_start: Option<u64>, grace: Duration) -> Termination {
    if !probe(pid, expected_start) || !signal_group(pid, Signal::SIGTERM) {
        return Termination::AlreadyExited;
    }
    if poll_until_gone(pid, expected_start, grace).await {
        return Termination::Graceful;
    }
    warn!(pid, ?grace, "adopted tart ignored SIGTERM, sending SIGKILL");
    signal_group(pid, Signal::SIGKILL);
    poll_until_gone(pid, expected_start, KILL_WAIT).await;
    Termination::Killed
}

async fn poll_until_gone(pid: u32, expected_start: Option<u64>, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        tokio::time::sleep(PROBE_INTERVAL).await;
        if !probe(pid, expected_start) {
            return true;
        }
    }
    false
}

/// Signal the group led by `pid`, falling back to the PID alone when it is
/// not a group leader. Returns false if nothing was there to signal.
fn signal_group(pid: u32, sig: Signal) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let target = Pid::from_raw(raw);
    match signal::killpg(target, sig) {
        Ok(()) => true,
        Err(Errno::ESRCH) => match signal::kill(target, sig) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                warn!(pid, signal = ?sig, error = %e, "failed to signal tart");
                false
            }
        },
        Err(e) => {
            warn!(pid, signal = ?sig, error = %e, "failed to signal tart group");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn script_dir(body: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("startup.sh"), body).unwrap();
        dir
    }

    fn spec(dir: &tempfile::TempDir) -> SpawnSpec {
        SpawnSpec {
            working_dir: dir.path().to_path_buf(),
            script: "startup.sh".to_string(),
            env: Vec::new(),
            log_file: None,
        }
    }

    #[tokio::test]
    async fn spawned_process_is_alive_until_terminated() {
        let dir = script_dir("exec sleep 30\n");
        let handle = ProcessHandle::spawn(&spec(&dir)).unwrap();
        assert!(handle.is_alive());
        assert!(probe(handle.pid(), handle.started_at()));

        let outcome = handle.terminate(Duration::from_secs(5)).await;
        assert_eq!(outcome, Termination::Graceful);
        assert!(!handle.is_alive());
        assert_eq!(
            handle.terminate(Duration::from_secs(1)).await,
            Termination::AlreadyExited
        );
    }

    #[tokio::test]
    async fn ignoring_sigterm_escalates_to_kill() {
        let dir = script_dir("trap '' TERM\nwhile true; do sleep 1; done\n");
        let handle = ProcessHandle::spawn(&spec(&dir)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let outcome = handle.terminate(Duration::from_millis(300)).await;
        assert_eq!(outcome, Termination::Killed);
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn env_and_log_file_are_applied() {
        let dir = script_dir("echo \"port=$PORT\"\necho oops >&2\n");
        let log = dir.path().join("logs").join("app.log");
        let mut spec = spec(&dir);
        spec.env = vec![("PORT".to_string(), "8080".to_string())];
        spec.log_file = Some(log.clone());

        let handle = ProcessHandle::spawn(&spec).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("port=8080"));
        assert!(contents.contains("oops"));
    }

    #[test]
    fn probe_rejects_impossible_pids() {
        assert!(!probe(0, None));
        assert!(!probe(u32::MAX, None));
    }

    #[test]
    fn probe_detects_start_time_mismatch() {
        let me = std::process::id();
        let info = inspect(me).unwrap();
        assert!(probe(me, Some(info.start_time)));
        assert!(!probe(me, Some(info.start_time + 1)));
    }
}
