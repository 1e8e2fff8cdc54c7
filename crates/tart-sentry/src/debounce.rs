//! Lull-period tracking between a crash and its restart.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Remembers when each tart was first seen dead.
#[derive(Debug, Default)]
pub struct RestartDebounce {
    first_seen_dead: HashMap<String, Instant>,
}

impl RestartDebounce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that `push_url` is dead at `now` and report whether `delay`
    /// has passed since it was first seen dead.
    pub fn due(&mut self, push_url: &str, now: Instant, delay: Duration) -> bool {
        let since = *self
            .first_seen_dead
            .entry(push_url.to_string())
            .or_insert(now);
        now.saturating_duration_since(since) >= delay
    }

    pub fn clear(&mut self, push_url: &str) {
        self.first_seen_dead.remove(push_url);
    }

    /// Forget tarts that are no longer flagged as running.
    pub fn retain_running(&mut self, running: &HashSet<&str>) {
        self.first_seen_dead
            .retain(|push_url, _| running.contains(push_url.as_str()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delay_is_due_immediately() {
        let mut debounce = RestartDebounce::new();
        assert!(debounce.due("/app", Instant::now(), Duration::ZERO));
    }

    #[test]
    fn delay_counts_from_first_detection() {
        let mut debounce = RestartDebounce::new();
        let t0 = Instant::now();
        let delay = Duration::from_secs(5);

        assert!(!debounce.due("/blog", t0, delay));
        assert!(!debounce.due("/blog", t0 + Duration::from_secs(4), delay));
        assert!(debounce.due("/blog", t0 + Duration::from_secs(5), delay));
    }

    #[test]
    fn clear_restarts_the_lull() {
        let mut debounce = RestartDebounce::new();
        let t0 = Instant::now();
        let delay = Duration::from_secs(5);
        debounce.due("/blog", t0, delay);
        debounce.clear("/blog");

        assert!(!debounce.due("/blog", t0 + Duration::from_secs(6), delay));
    }

    #[test]
    fn retain_drops_stopped_tarts() {
        let mut debounce = RestartDebounce::new();
        let now = Instant::now();
        let delay = Duration::from_secs(1);
        debounce.due("/a", now, delay);
        debounce.due("/b", now, delay);

        let running = HashSet::from(["/b"]);
        debounce.retain_running(&running);
        let later = now + Duration::from_secs(2);
        assert!(!debounce.due("/a", later, delay));
        assert!(debounce.due("/b", later, delay));
    }
}
