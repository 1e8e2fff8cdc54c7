//! Stats collector — one-shot OS queries for a tart's process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tart_state::Tart;
use tart_supervisor::{Supervisor, TartError, TartResult};
use tracing::debug;

/// Resource usage of a tart at one instant. Never persisted.
///
/// Memory and CPU are summed over the tracked process and all of its
/// descendants, since the tracked PID is usually the `sh` running the
/// startup script rather than the app itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunMetrics {
    pub pid: u32,
    /// Processes counted, the tracked one included.
    pub processes: usize,
    pub resident_memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    /// User plus system CPU time since each process started.
    pub cpu_time: Duration,
    /// Wall-clock time since the tracked process started.
    pub run_time: Duration,
}

pub struct StatsCollector {
    supervisor: Arc<Supervisor>,
}

impl StatsCollector {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    /// Snapshot the process tree behind `push_url`.
    pub fn get_stats(&self, push_url: &str) -> TartResult<RunMetrics> {
        let tart = self
            .supervisor
            .store()
            .get(push_url)?
            .ok_or_else(|| TartError::NotFound(push_url.to_string()))?;
        self.stats_for(&tart)
    }

    pub fn stats_for(&self, tart: &Tart) -> TartResult<RunMetrics> {
        let not_running = || TartError::NotRunning(tart.push_url.clone());
        let pid = match tart.pid {
            Some(pid) if tart.is_running && self.supervisor.is_live(tart) => pid,
            _ => return Err(not_running()),
        };

        let root = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
        let run_time = system.process(root).ok_or_else(not_running)?.run_time();

        let mut metrics = RunMetrics {
            pid,
            processes: 0,
            resident_memory_bytes: 0,
            virtual_memory_bytes: 0,
            cpu_time: Duration::ZERO,
            run_time: Duration::from_secs(run_time),
        };
        for member in process_tree(&system, root) {
            let Some(process) = system.process(member) else {
                continue;
            };
            metrics.processes += 1;
            metrics.resident_memory_bytes += process.memory();
            metrics.virtual_memory_bytes += process.virtual_memory();
            metrics.cpu_time += Duration::from_millis(process.accumulated_cpu_time());
        }
        debug!(push_url = %tart.push_url, ?metrics, "stats collected");
        Ok(metrics)
    }
}

/// `root` and every descendant of it. Threads are skipped; their memory
/// is already part of the owning process.
fn process_tree(system: &System, root: Pid) -> Vec<Pid> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut seen = HashSet::new();
    let mut pending = vec![root];
    let mut tree = Vec::new();
    while let Some(pid) = pending.pop() {
        if !seen.insert(pid) {
            continue;
        }
        tree.push(pid);
        if let Some(kids) = children.get(&pid) {
            pending.extend(kids.iter().copied());
        }
    }
    tree
}
