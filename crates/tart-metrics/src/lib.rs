//! tart-metrics — resource usage of running tarts.
//!
//! Nothing is sampled in the background: each [`StatsCollector::get_stats`]
//! call reads the OS process table once and returns a [`RunMetrics`]
//! snapshot. The status page and the `tart-stats` command render those
//! snapshots with the helpers in [`format`].
//!
//! # Architecture
//!
//! ```text
//! StatsCollector
//!   ├── TartStore (push_url → pid)
//!   ├── Supervisor::is_live (is that pid still ours?)
//!   └── sysinfo (memory, cpu time, run time)
//! ```

pub mod collector;
pub mod format;

pub use collector::{RunMetrics, StatsCollector};
pub use format::{format_bytes, format_duration};
