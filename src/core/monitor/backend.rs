// src/core/monitor/backend.rs

//! The seam between a monitor tick and the actual wire protocol used to
//! probe a backend. The concrete MariaDB/MySQL (or Postgres) health-check
//! exchange is out of scope here; this crate defines the trait and a
//! deterministic stub good enough for tests and for composing with a real
//! driver later.

use std::net::SocketAddr;

use async_trait::async_trait;

use super::settings::ConnectionSettings;
use super::status::StatusBits;

/// The outcome of attempting to reach a backend, mirroring the distinct
/// failure modes a monitor needs to log and react to differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectResult {
    /// An existing connection was still alive and answered the probe.
    OldConnOk,
    /// No usable existing connection; a new one was opened successfully.
    NewConnOk,
    Refused,
    Timeout,
    AccessDenied,
}

impl ConnectResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ConnectResult::OldConnOk | ConnectResult::NewConnOk)
    }
}

/// Implemented by whatever can actually speak to a backend: ping it, and
/// report the role/replication bits a successful probe discovered.
#[async_trait]
pub trait BackendProbe: Send + Sync {
    async fn ping_or_connect(
        &self,
        address: SocketAddr,
        settings: &ConnectionSettings,
    ) -> ConnectResult;

    /// Discovers the role bits this backend currently holds (MASTER, SLAVE,
    /// JOINED, …). Only called after a successful `ping_or_connect`.
    async fn probe_status(&self, address: SocketAddr) -> StatusBits;

    /// Reports bytes used on `path` on this backend, if the probe supports
    /// it. `None` counts as a probe failure for disk-space monitoring
    /// purposes; the default implementation reports no support at all.
    async fn disk_usage(&self, _address: SocketAddr, _path: &str) -> Option<u64> {
        None
    }
}

/// A probe backed by a fixed, externally updated table — used in tests and
/// as a placeholder until a real protocol driver is wired in.
#[derive(Default)]
pub struct StaticProbe {
    table: dashmap::DashMap<SocketAddr, StatusBits>,
    unreachable: dashmap::DashSet<SocketAddr>,
    disk_usage: dashmap::DashMap<SocketAddr, u64>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, address: SocketAddr, status: StatusBits) {
        self.unreachable.remove(&address);
        self.table.insert(address, status);
    }

    pub fn set_unreachable(&self, address: SocketAddr) {
        self.table.remove(&address);
        self.unreachable.insert(address);
    }

    pub fn set_disk_usage(&self, address: SocketAddr, used_bytes: u64) {
        self.disk_usage.insert(address, used_bytes);
    }
}

#[async_trait]
impl BackendProbe for StaticProbe {
    async fn ping_or_connect(
        &self,
        address: SocketAddr,
        _settings: &ConnectionSettings,
    ) -> ConnectResult {
        if self.unreachable.contains(&address) {
            ConnectResult::Refused
        } else {
            ConnectResult::NewConnOk
        }
    }

    async fn probe_status(&self, address: SocketAddr) -> StatusBits {
        self.table
            .get(&address)
            .map(|s| *s.value())
            .unwrap_or(StatusBits::empty())
    }

    async fn disk_usage(&self, address: SocketAddr, _path: &str) -> Option<u64> {
        self.disk_usage.get(&address).map(|v| *v.value())
    }
}
