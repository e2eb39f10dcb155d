// src/server/mod.rs

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use crate::core::monitor::{BackendProbe, MonitorLoop, Server, StaticProbe};
use crate::core::parsing_cache;
use crate::core::rules::RuleEngine;

pub mod admin_server;
pub mod state;

use state::{AppState, EventBuffer, MonitorGroup, event_sink_for};

/// Builds the shared state and every monitor loop from a validated
/// [`Config`], without starting any background tasks yet.
pub fn build_state(config: &Config, probe: Arc<dyn BackendProbe>) -> Result<Arc<AppState>> {
    parsing_cache::set_cache_max_size(config.cache_max_size);
    parsing_cache::set_running_threads(config.monitors.len().max(1));

    let rules = match &config.rules_path {
        Some(path) => RuleEngine::load_file(path)?,
        None => RuleEngine::empty(),
    };

    let events = Arc::new(EventBuffer::new());
    let mut monitors = HashMap::with_capacity(config.monitors.len());

    for group_cfg in &config.monitors {
        let servers: Vec<Arc<Server>> = group_cfg
            .servers
            .iter()
            .map(|s| Arc::new(Server::new(s.name.clone(), s.address)))
            .collect();

        let monitor = MonitorLoop::new(
            group_cfg.name.clone(),
            group_cfg.settings.clone(),
            servers.clone(),
            probe.clone(),
            config.data_dir.clone(),
        )
        .with_event_sink(event_sink_for(group_cfg.name.clone(), events.clone()));

        monitors.insert(
            group_cfg.name.clone(),
            MonitorGroup {
                servers,
                monitor: Arc::new(monitor),
            },
        );
    }

    Ok(Arc::new(AppState::new(
        rules,
        monitors,
        config.admin_addr,
        events,
    )))
}

/// Runs every configured monitor loop plus the admin HTTP surface until a
/// Ctrl-C signal is received. Each monitor runs on its own task, per the
/// one-worker-per-monitor design.
pub async fn run(config: Config) -> Result<()> {
    let probe: Arc<dyn BackendProbe> = Arc::new(StaticProbe::new());
    let state = build_state(&config, probe)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = tokio::task::JoinSet::new();
    for group in state.monitors.values() {
        let monitor = group.monitor.clone();
        let rx = shutdown_rx.clone();
        tasks.spawn(async move { monitor.run(rx).await });
    }

    let admin_state = state.clone();
    let admin_addr = state.admin_addr;
    let admin_rx = shutdown_rx.clone();
    tasks.spawn(async move { admin_server::run_admin_server(admin_state, admin_addr, admin_rx).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        Some(res) = tasks.join_next() => {
            if let Err(e) = res {
                tracing::error!("a server task panicked: {}", e);
            }
        }
    }

    let _ = shutdown_tx.send(true);
    while tasks.join_next().await.is_some() {}

    Ok(())
}
