// src/core/monitor/settings.rs

//! Immutable-while-running monitor configuration.

use std::time::Duration;

use super::status::Event;

/// Per-backend connection behavior: timeouts and retry count used by
/// [`super::backend::BackendProbe::ping_or_connect`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub connect_attempts: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            connect_attempts: 1,
        }
    }
}

/// Configuration for a single monitor instance, fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub tick_interval: Duration,
    pub script: Option<String>,
    pub script_timeout: Duration,
    /// Which events, when derived, trigger the configured script.
    pub event_mask: Vec<Event>,
    pub journal_max_age: Duration,
    pub connection: ConnectionSettings,
    pub disk_space_check_interval: Duration,
    /// (path, limit_bytes) pairs to probe disk usage under; empty disables
    /// disk-space monitoring entirely.
    pub disk_space_thresholds: Vec<(String, u64)>,
}

impl MonitorSettings {
    /// Whether `event` is configured to fire the script.
    pub fn fires_script(&self, event: Event) -> bool {
        self.event_mask.iter().any(|e| *e == event)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(2000),
            script: None,
            script_timeout: Duration::from_secs(90),
            event_mask: Vec::new(),
            journal_max_age: Duration::from_secs(28800),
            connection: ConnectionSettings::default(),
            disk_space_check_interval: Duration::from_secs(120),
            disk_space_thresholds: Vec::new(),
        }
    }
}
