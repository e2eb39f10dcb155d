// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the proxy core.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_gauge_vec,
};

lazy_static! {
    // --- Parsing cache ---
    pub static ref CACHE_HITS_TOTAL: Counter =
        register_counter!("relwarden_parsing_cache_hits_total", "Total parsing cache hits.").unwrap();
    pub static ref CACHE_MISSES_TOTAL: Counter =
        register_counter!("relwarden_parsing_cache_misses_total", "Total parsing cache misses.").unwrap();
    pub static ref CACHE_EVICTIONS_TOTAL: Counter =
        register_counter!("relwarden_parsing_cache_evictions_total", "Total parsing cache evictions.").unwrap();
    pub static ref CACHE_SIZE_BYTES: Gauge =
        register_gauge!("relwarden_parsing_cache_size_bytes", "Current size of this thread's parsing cache.").unwrap();

    // --- Monitor ---
    /// Current status bitmask of a monitored server, labeled by server name.
    pub static ref SERVER_STATUS_BITS: GaugeVec =
        register_gauge_vec!("relwarden_server_status_bits", "Current status bitmask of a monitored server.", &["server"]).unwrap();
    /// Total monitor events fired, labeled by server name and event kind.
    pub static ref MONITOR_EVENTS_TOTAL: CounterVec =
        register_counter_vec!("relwarden_monitor_events_total", "Total monitor events fired, labeled by server and event.", &["server", "event"]).unwrap();
    /// Total external-command script invocations, labeled by outcome.
    pub static ref SCRIPT_INVOCATIONS_TOTAL: CounterVec =
        register_counter_vec!("relwarden_script_invocations_total", "Total monitor script invocations, labeled by outcome.", &["outcome"]).unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
