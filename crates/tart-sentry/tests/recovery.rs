//! Crash recovery through the sentry against real processes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tart_sentry::Sentry;
use tart_state::{StateStore, Tart, TartStore};
use tart_supervisor::{Supervisor, SupervisorSettings};

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<dyn TartStore>,
    supervisor: Arc<Supervisor>,
}

fn harness(tarts: &[Tart]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings = SupervisorSettings {
        deployment_path: dir.path().join("deployments"),
        logs_dir: dir.path().join("logs"),
        startup_script: "startup.sh".to_string(),
        stop_grace: Duration::from_secs(5),
    };
    let store: Arc<dyn TartStore> = Arc::new(StateStore::open_in_memory().unwrap());
    for tart in tarts {
        let deploy_dir = settings.deployment_dir(&tart.push_url);
        std::fs::create_dir_all(&deploy_dir).unwrap();
        std::fs::write(deploy_dir.join("startup.sh"), "exec sleep 30\n").unwrap();
        store.save(tart).unwrap();
    }
    let supervisor = Arc::new(Supervisor::new(store.clone(), settings));
    Harness {
        _dir: dir,
        store,
        supervisor,
    }
}

fn tart(push_url: &str, restart: bool, delay: u64) -> Tart {
    let mut tart = Tart::placeholder(push_url, "alice");
    tart.restart_on_stop = restart;
    tart.restart_delay_secs = delay;
    tart
}

/// SIGKILL the tart's process and wait until the supervisor sees it gone.
async fn crash(h: &Harness, push_url: &str) -> u32 {
    let pid = h.store.get(push_url).unwrap().unwrap().pid.unwrap();
    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
    for _ in 0..50 {
        let tart = h.store.get(push_url).unwrap().unwrap();
        if !h.supervisor.is_live(&tart) {
            return pid;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("process {pid} did not die");
}

#[tokio::test]
async fn restarts_once_after_lull_period() {
    let h = harness(&[tart("/blog", true, 5)]);
    h.supervisor.start("/blog").await.unwrap();
    let old_pid = crash(&h, "/blog").await;

    let mut sentry = Sentry::new(h.supervisor.clone(), Duration::from_secs(10));
    let t0 = Instant::now();

    let report = sentry.tick_at(t0).await;
    assert_eq!(report.waiting, vec!["/blog"]);
    assert!(report.restarted.is_empty());

    let report = sentry.tick_at(t0 + Duration::from_secs(4)).await;
    assert_eq!(report.waiting, vec!["/blog"]);

    let report = sentry.tick_at(t0 + Duration::from_secs(5)).await;
    assert_eq!(report.restarted, vec!["/blog"]);

    let tart = h.store.get("/blog").unwrap().unwrap();
    assert!(tart.is_running);
    assert_ne!(tart.pid, Some(old_pid));
    assert!(h.supervisor.is_live(&tart));

    let report = sentry.tick_at(t0 + Duration::from_secs(6)).await;
    assert!(report.restarted.is_empty());
    assert!(report.waiting.is_empty());

    h.supervisor.stop("/blog").await.unwrap();
}

#[tokio::test]
async fn manual_stop_cancels_pending_restart() {
    let h = harness(&[tart("/blog", true, 5)]);
    h.supervisor.start("/blog").await.unwrap();
    crash(&h, "/blog").await;

    let mut sentry = Sentry::new(h.supervisor.clone(), Duration::from_secs(10));
    let t0 = Instant::now();
    sentry.tick_at(t0).await;

    h.supervisor.stop("/blog").await.unwrap();
    let report = sentry.tick_at(t0 + Duration::from_secs(60)).await;

    assert_eq!(report.checked, 0);
    assert!(report.restarted.is_empty());
    let tart = h.store.get("/blog").unwrap().unwrap();
    assert!(!tart.is_running);
    assert_eq!(tart.pid, None);
}

#[tokio::test]
async fn dead_tart_without_policy_is_marked_stopped() {
    let h = harness(&[tart("/api", false, 0)]);
    h.supervisor.start("/api").await.unwrap();
    crash(&h, "/api").await;

    let mut sentry = Sentry::new(h.supervisor.clone(), Duration::from_secs(10));
    let report = sentry.tick().await;

    assert_eq!(report.marked_stopped, vec!["/api"]);
    let tart = h.store.get("/api").unwrap().unwrap();
    assert!(!tart.is_running);
    assert_eq!(tart.pid, None);
}

#[tokio::test]
async fn live_tarts_are_left_alone() {
    let h = harness(&[tart("/a", true, 0), tart("/b", false, 0)]);
    let pid_a = h.supervisor.start("/a").await.unwrap();
    let pid_b = h.supervisor.start("/b").await.unwrap();

    let mut sentry = Sentry::new(h.supervisor.clone(), Duration::from_secs(10));
    let report = sentry.tick().await;

    assert_eq!(report.checked, 2);
    assert!(report.restarted.is_empty());
    assert!(report.marked_stopped.is_empty());
    assert_eq!(h.store.get("/a").unwrap().unwrap().pid, Some(pid_a));
    assert_eq!(h.store.get("/b").unwrap().unwrap().pid, Some(pid_b));

    h.supervisor.stop("/a").await.unwrap();
    h.supervisor.stop("/b").await.unwrap();
}

#[tokio::test]
async fn failed_restart_is_retried_next_tick() {
    let h = harness(&[tart("/app", true, 0)]);
    h.supervisor.start("/app").await.unwrap();
    crash(&h, "/app").await;

    let script = h.supervisor.settings().deployment_dir("/app").join("startup.sh");
    std::fs::remove_file(&script).unwrap();

    let mut sentry = Sentry::new(h.supervisor.clone(), Duration::from_secs(10));
    let report = sentry.tick().await;
    assert_eq!(report.failed, vec!["/app"]);
    assert!(h.store.get("/app").unwrap().unwrap().is_running);

    std::fs::write(&script, "exec sleep 30\n").unwrap();
    let report = sentry.tick().await;
    assert_eq!(report.restarted, vec!["/app"]);

    h.supervisor.stop("/app").await.unwrap();
}

#[tokio::test]
async fn busy_tart_does_not_hold_up_the_others() {
    let h = harness(&[tart("/a", true, 0), tart("/b", true, 0)]);
    h.supervisor.start("/a").await.unwrap();
    h.supervisor.start("/b").await.unwrap();
    let old_b = crash(&h, "/b").await;

    // Stands in for a long deploy of /a.
    let held = h.supervisor.lock("/a").await;
    let mut sentry = Sentry::new(h.supervisor.clone(), Duration::from_secs(10));
    let report = tokio::time::timeout(Duration::from_secs(3), sentry.tick())
        .await
        .expect("tick waited on a busy tart");

    assert_eq!(report.busy, vec!["/a"]);
    assert_eq!(report.restarted, vec!["/b"]);
    let b = h.store.get("/b").unwrap().unwrap();
    assert_ne!(b.pid, Some(old_b));
    assert!(h.supervisor.is_live(&b));

    drop(held);
    let report = sentry.tick().await;
    assert!(report.busy.is_empty());
    assert_eq!(report.checked, 2);

    h.supervisor.stop("/a").await.unwrap();
    h.supervisor.stop("/b").await.unwrap();
}

#[tokio::test]
async fn run_loop_exits_on_shutdown() {
    let h = harness(&[]);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sentry = Sentry::new(h.supervisor.clone(), Duration::from_millis(20));
    let handle = tokio::spawn(sentry.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}
