//! Human-readable rendering of [`RunMetrics`](crate::RunMetrics) fields.

use std::time::Duration;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// `1536` → `1.5 KB`. Powers of 1024.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// `3725s` → `1 hours, 2 minutes, 5 seconds`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!(
        "{} hours, {} minutes, {} seconds",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}
