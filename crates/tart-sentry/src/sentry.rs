//! The sentry loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tart_state::Tart;
use tart_supervisor::Supervisor;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::debounce::RestartDebounce;

/// What one tick did, by push URL.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub checked: usize,
    pub restarted: Vec<String>,
    pub marked_stopped: Vec<String>,
    /// Dead, but still inside their lull period.
    pub waiting: Vec<String>,
    pub failed: Vec<String>,
    /// Locked by a command or deploy; looked at again next tick.
    pub busy: Vec<String>,
}

pub struct Sentry {
    supervisor: Arc<Supervisor>,
    interval: Duration,
    debounce: RestartDebounce,
}

impl Sentry {
    pub fn new(supervisor: Arc<Supervisor>, interval: Duration) -> Self {
        Self {
            supervisor,
            interval,
            debounce: RestartDebounce::new(),
        }
    }

    /// Tick every interval until `shutdown` fires. Ticks never overlap.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "sentry started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let report = self.tick().await;
                    debug!(
                        checked = report.checked,
                        restarted = report.restarted.len(),
                        marked_stopped = report.marked_stopped.len(),
                        waiting = report.waiting.len(),
                        busy = report.busy.len(),
                        "sentry tick"
                    );
                }
                _ = shutdown.changed() => {
                    debug!("sentry shutting down");
                    break;
                }
            }
        }
    }

    pub async fn tick(&mut self) -> TickReport {
        self.tick_at(Instant::now()).await
    }

    /// One reconciliation pass, with `now` as the detection time.
    pub async fn tick_at(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        let tarts = match self.supervisor.store().all() {
            Ok(tarts) => tarts,
            Err(e) => {
                error!(error = %e, "sentry could not list tarts");
                return report;
            }
        };

        let running: Vec<Tart> = tarts.into_iter().filter(|t| t.is_running).collect();
        let running_urls: HashSet<&str> = running.iter().map(|t| t.push_url.as_str()).collect();
        self.debounce.retain_running(&running_urls);

        for tart in &running {
            report.checked += 1;
            self.reconcile(&tart.push_url, now, &mut report).await;
        }
        report
    }

    async fn reconcile(&mut self, push_url: &str, now: Instant, report: &mut TickReport) {
        // Never wait behind a long deploy or stop of one tart.
        let Some(lock) = self.supervisor.try_lock(push_url) else {
            debug!(%push_url, "tart busy, skipping until next tick");
            report.busy.push(push_url.to_string());
            return;
        };

        // Re-read under the lock: a stop issued since listing wins.
        let tart = match self.supervisor.store().get(push_url) {
            Ok(Some(tart)) if tart.is_running => tart,
            Ok(_) => {
                self.debounce.clear(push_url);
                return;
            }
            Err(e) => {
                warn!(%push_url, error = %e, "sentry could not read tart");
                return;
            }
        };

        if self.supervisor.is_live(&tart) {
            self.debounce.clear(push_url);
            return;
        }

        if !tart.restart_on_stop {
            match self.supervisor.mark_stopped_locked(&lock) {
                Ok(()) => {
                    info!(%push_url, pid = ?tart.pid, "tart died, restart disabled");
                    report.marked_stopped.push(push_url.to_string());
                }
                Err(e) => {
                    warn!(%push_url, error = %e, "failed to mark dead tart stopped");
                    report.failed.push(push_url.to_string());
                }
            }
            return;
        }

        let delay = Duration::from_secs(tart.restart_delay_secs);
        if !self.debounce.due(push_url, now, delay) {
            debug!(%push_url, ?delay, "tart died, waiting out lull period");
            report.waiting.push(push_url.to_string());
            return;
        }

        match self.supervisor.start_locked(&lock).await {
            Ok(pid) => {
                self.debounce.clear(push_url);
                info!(%push_url, old_pid = ?tart.pid, pid, "tart restarted by sentry");
                report.restarted.push(push_url.to_string());
            }
            Err(e) => {
                warn!(%push_url, error = %e, "sentry restart failed, retrying next tick");
                report.failed.push(push_url.to_string());
            }
        }
    }
}
