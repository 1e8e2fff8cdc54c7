//! Domain types stored in the tart store.

use serde::{Deserialize, Serialize};

/// A deployed application: its identity, owners, environment and the
/// supervisor's view of its process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tart {
    /// Unique, rooted identifier (`/blog`). Never changes after creation.
    pub push_url: String,
    pub name: String,
    /// Usernames allowed to mutate this tart. Never empty.
    pub owners: Vec<String>,
    pub is_running: bool,
    /// Meaningful only while `is_running`.
    #[serde(default)]
    pub pid: Option<u32>,
    /// OS start time (epoch seconds) of `pid`, used to spot PID reuse.
    #[serde(default)]
    pub pid_started_at: Option<u64>,
    pub log_stdout: bool,
    /// Ordered `KEY=VALUE` entries with unique keys.
    #[serde(default)]
    pub env: Vec<String>,
    pub restart_on_stop: bool,
    /// Lull period between detecting a crash and restarting.
    pub restart_delay_secs: u64,
    #[serde(default)]
    pub last_hash: String,
    #[serde(default)]
    pub last_git_message: String,
}

impl Tart {
    /// A freshly created tart: stopped, never deployed, one owner.
    pub fn placeholder(push_url: &str, owner: &str) -> Self {
        let name = push_url.trim_matches('/').to_string();
        Self {
            push_url: push_url.to_string(),
            name,
            owners: vec![owner.to_string()],
            is_running: false,
            pid: None,
            pid_started_at: None,
            log_stdout: false,
            env: Vec::new(),
            restart_on_stop: false,
            restart_delay_secs: 0,
            last_hash: String::new(),
            last_git_message: String::new(),
        }
    }

    /// Record a freshly spawned process.
    pub fn mark_running(&mut self, pid: u32, started_at: Option<u64>) {
        self.is_running = true;
        self.pid = Some(pid);
        self.pid_started_at = started_at;
    }

    pub fn mark_stopped(&mut self) {
        self.is_running = false;
        self.pid = None;
        self.pid_started_at = None;
    }

    /// Set `KEY=VALUE`, replacing an existing entry for `KEY` in place.
    ///
    /// Returns `false` if `entry` is not of the form `KEY=VALUE`.
    pub fn set_env(&mut self, entry: &str) -> bool {
        let Some(key) = env_key(entry) else {
            return false;
        };
        match self.env.iter_mut().find(|e| env_key(e) == Some(key)) {
            Some(existing) => *existing = entry.to_string(),
            None => self.env.push(entry.to_string()),
        }
        true
    }

    /// Remove the entry for `key`. Returns whether one existed.
    pub fn delete_env(&mut self, key: &str) -> bool {
        let before = self.env.len();
        self.env.retain(|e| env_key(e) != Some(key));
        self.env.len() != before
    }

    /// The environment as key/value pairs, in stored order.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|e| e.split_once('='))
    }
}

/// The key part of a `KEY=VALUE` entry. Keys must be non-empty.
pub fn env_key(entry: &str) -> Option<&str> {
    match entry.split_once('=') {
        Some((key, _)) if !key.is_empty() => Some(key),
        _ => None,
    }
}
