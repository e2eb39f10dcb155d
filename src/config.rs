// src/config.rs

//! Loads and validates the proxy's TOML configuration: the admin interface,
//! the monitored backend groups, rule/script paths, and the parsing-cache
//! budget.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::core::monitor::status::Event;

/// Raw, directly-deserialized TOML shape. Kept separate from [`Config`] so
/// `#[serde(default = "...")]` fallbacks stay close to the file format while
/// [`Config`] carries only validated, resolved values.
#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(default = "default_admin_host")]
    admin_host: String,
    #[serde(default = "default_admin_port")]
    admin_port: u16,

    #[serde(default)]
    data_dir: Option<PathBuf>,

    #[serde(default)]
    rules_path: Option<PathBuf>,

    #[serde(default = "default_cache_max_size")]
    cache_max_size: i64,

    #[serde(default)]
    monitors: Vec<RawMonitorGroup>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMonitorGroup {
    name: String,
    servers: Vec<RawServer>,

    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    tick_interval: Duration,

    #[serde(default)]
    script: Option<String>,

    #[serde(with = "humantime_serde", default = "default_script_timeout")]
    script_timeout: Duration,

    #[serde(default)]
    events: Vec<String>,

    #[serde(with = "humantime_serde", default = "default_journal_max_age")]
    journal_max_age: Duration,

    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    connect_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    read_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    write_timeout: Duration,

    #[serde(default = "default_connect_attempts")]
    connect_attempts: u32,

    #[serde(with = "humantime_serde", default = "default_disk_space_check_interval")]
    disk_space_check_interval: Duration,

    #[serde(default)]
    disk_space_thresholds: Vec<RawDiskThreshold>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDiskThreshold {
    path: String,
    limit_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawServer {
    name: String,
    address: String,
    #[serde(default)]
    weight: u32,
    #[serde(default)]
    rank: u32,
}

fn default_admin_host() -> String {
    "0.0.0.0".to_string()
}
fn default_admin_port() -> u16 {
    8999
}
fn default_cache_max_size() -> i64 {
    100 * 1024 * 1024
}
fn default_tick_interval() -> Duration {
    Duration::from_millis(2000)
}
fn default_script_timeout() -> Duration {
    Duration::from_secs(90)
}
fn default_journal_max_age() -> Duration {
    Duration::from_secs(28800)
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_read_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_write_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_connect_attempts() -> u32 {
    1
}
fn default_disk_space_check_interval() -> Duration {
    Duration::from_secs(120)
}

/// A validated, ready-to-use backend entry within a monitor group.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub address: SocketAddr,
    pub weight: u32,
    pub rank: u32,
}

/// A validated monitor group: the servers it probes plus its settings.
#[derive(Debug, Clone)]
pub struct MonitorGroupConfig {
    pub name: String,
    pub servers: Vec<ServerConfig>,
    pub settings: crate::core::monitor::MonitorSettings,
}

/// The fully validated, resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub admin_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub rules_path: Option<PathBuf>,
    pub cache_max_size: i64,
    pub monitors: Vec<MonitorGroupConfig>,
}

fn parse_event(name: &str) -> Result<Event> {
    Ok(match name {
        "master_down" => Event::MasterDown,
        "master_up" => Event::MasterUp,
        "slave_down" => Event::SlaveDown,
        "slave_up" => Event::SlaveUp,
        "server_down" => Event::ServerDown,
        "server_up" => Event::ServerUp,
        "synced_down" => Event::SyncedDown,
        "synced_up" => Event::SyncedUp,
        "lost_master" => Event::LostMaster,
        "lost_slave" => Event::LostSlave,
        "lost_synced" => Event::LostSynced,
        "new_master" => Event::NewMaster,
        "new_slave" => Event::NewSlave,
        "new_synced" => Event::NewSynced,
        other => return Err(anyhow!("unknown monitor event '{other}'")),
    })
}

impl Config {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Self::resolve(raw)
    }

    fn resolve(raw: RawConfig) -> Result<Self> {
        if raw.admin_host.is_empty() {
            return Err(anyhow!("admin_host must not be empty"));
        }
        if raw.admin_port == 0 {
            return Err(anyhow!("admin_port must be nonzero"));
        }
        let admin_addr: SocketAddr = format!("{}:{}", raw.admin_host, raw.admin_port)
            .parse()
            .with_context(|| "invalid admin_host/admin_port")?;

        if raw.monitors.iter().map(|m| &m.name).collect::<std::collections::HashSet<_>>().len()
            != raw.monitors.len()
        {
            return Err(anyhow!("monitor group names must be unique"));
        }

        let mut monitors = Vec::with_capacity(raw.monitors.len());
        for group in raw.monitors {
            if group.servers.is_empty() {
                return Err(anyhow!("monitor group '{}' has no servers", group.name));
            }
            let mut servers = Vec::with_capacity(group.servers.len());
            for s in group.servers {
                let address: SocketAddr = s
                    .address
                    .parse()
                    .with_context(|| format!("invalid address for server '{}'", s.name))?;
                servers.push(ServerConfig {
                    name: s.name,
                    address,
                    weight: s.weight,
                    rank: s.rank,
                });
            }

            let event_mask = group
                .events
                .iter()
                .map(|e| parse_event(e))
                .collect::<Result<Vec<_>>>()?;

            let settings = crate::core::monitor::MonitorSettings {
                tick_interval: group.tick_interval,
                script: group.script,
                script_timeout: group.script_timeout,
                event_mask,
                journal_max_age: group.journal_max_age,
                connection: crate::core::monitor::ConnectionSettings {
                    connect_timeout: group.connect_timeout,
                    read_timeout: group.read_timeout,
                    write_timeout: group.write_timeout,
                    connect_attempts: group.connect_attempts,
                },
                disk_space_check_interval: group.disk_space_check_interval,
                disk_space_thresholds: group
                    .disk_space_thresholds
                    .into_iter()
                    .map(|t| (t.path, t.limit_bytes))
                    .collect(),
            };

            monitors.push(MonitorGroupConfig {
                name: group.name,
                servers,
                settings,
            });
        }

        Ok(Config {
            admin_addr,
            data_dir: raw.data_dir.unwrap_or_else(|| PathBuf::from("./data")),
            rules_path: raw.rules_path,
            cache_max_size: raw.cache_max_size,
            monitors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml_src = r#"
            admin_port = 9000

            [[monitors]]
            name = "cluster1"
            tick_interval = "1s"
            script_timeout = "5s"

            [[monitors.servers]]
            name = "db1"
            address = "127.0.0.1:3306"
        "#;
        let raw: RawConfig = toml::from_str(toml_src).unwrap();
        let cfg = Config::resolve(raw).unwrap();
        assert_eq!(cfg.admin_addr.port(), 9000);
        assert_eq!(cfg.monitors.len(), 1);
        assert_eq!(cfg.monitors[0].servers[0].name, "db1");
    }

    #[test]
    fn rejects_empty_monitor_group() {
        let toml_src = r#"
            [[monitors]]
            name = "cluster1"
            servers = []
        "#;
        let raw: RawConfig = toml::from_str(toml_src).unwrap();
        assert!(Config::resolve(raw).is_err());
    }

    #[test]
    fn rejects_unknown_event_name() {
        let toml_src = r#"
            [[monitors]]
            name = "cluster1"
            events = ["not_a_real_event"]

            [[monitors.servers]]
            name = "db1"
            address = "127.0.0.1:3306"
        "#;
        let raw: RawConfig = toml::from_str(toml_src).unwrap();
        assert!(Config::resolve(raw).is_err());
    }
}
