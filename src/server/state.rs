// src/server/state.rs

//! Shared application state handed to the admin HTTP surface and to
//! whatever external router/filter code embeds this crate.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::core::monitor::{MonitorLoop, Server};
use crate::core::rules::RuleEngine;

/// A backend group as tracked for admin diagnostics: its servers plus the
/// loop that owns them.
pub struct MonitorGroup {
    pub servers: Vec<Arc<Server>>,
    pub monitor: Arc<MonitorLoop>,
}

/// One entry in the rolling buffer of recently fired monitor events.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub monitor: String,
    pub server: String,
    pub event: String,
    pub at_unix: u64,
}

const EVENT_BUFFER_CAPACITY: usize = 256;

/// A small ring buffer of recently fired monitor events, shared between
/// every monitor loop (as a sink) and the admin diagnostics endpoint
/// (as a reader).
#[derive(Default)]
pub struct EventBuffer {
    events: Mutex<VecDeque<EventRecord>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(EVENT_BUFFER_CAPACITY)),
        }
    }

    pub fn push(&self, record: EventRecord) {
        let mut buf = self.events.lock();
        if buf.len() == EVENT_BUFFER_CAPACITY {
            buf.pop_front();
        }
        buf.push_back(record);
    }

    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.events.lock().iter().cloned().collect()
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Builds the `on_event` closure a [`MonitorLoop`] is configured with,
/// recording every derived event into `buffer` under the monitor's name.
pub fn event_sink_for(
    monitor_name: String,
    buffer: Arc<EventBuffer>,
) -> Arc<dyn Fn(&str, crate::core::monitor::Event) + Send + Sync> {
    Arc::new(move |server_name: &str, event: crate::core::monitor::Event| {
        buffer.push(EventRecord {
            monitor: monitor_name.clone(),
            server: server_name.to_string(),
            event: event.name().to_string(),
            at_unix: now_unix(),
        });
    })
}

/// Top-level shared state: the rule engine, the monitored backend groups,
/// and a small ring buffer of recent events for the diagnostics endpoint.
pub struct AppState {
    pub rules: RuleEngine,
    pub monitors: HashMap<String, MonitorGroup>,
    pub admin_addr: SocketAddr,
    pub events: Arc<EventBuffer>,
}

impl AppState {
    pub fn new(
        rules: RuleEngine,
        monitors: HashMap<String, MonitorGroup>,
        admin_addr: SocketAddr,
        events: Arc<EventBuffer>,
    ) -> Self {
        Self {
            rules,
            monitors,
            admin_addr,
            events,
        }
    }

    pub fn recent_events(&self) -> Vec<EventRecord> {
        self.events.snapshot()
    }
}
