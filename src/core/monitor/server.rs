// src/core/monitor/server.rs

//! Per-backend monitor-local state: the "shadow" a [`MonitorLoop`](super::MonitorLoop)
//! keeps for each configured [`Server`], distinct from the server's own
//! publicly readable status word.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::status::{Event, StatusBits, derive_event};

/// An administrative request queued against a server, applied at the next
/// tick boundary so it never races with the snapshot used to compute events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminRequest {
    #[default]
    None,
    MaintOn,
    MaintOff,
    DrainingOn,
    DrainingOff,
}

/// The shared, atomically readable status word for one backend. Any number
/// of readers (routers, admin endpoints) may load it without locking; only
/// the owning monitor worker ever stores to it.
#[derive(Debug)]
pub struct Server {
    pub name: String,
    pub address: SocketAddr,
    status: AtomicU32,
}

impl Server {
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            name: name.into(),
            address,
            status: AtomicU32::new(0),
        }
    }

    pub fn status(&self) -> StatusBits {
        StatusBits::from_bits_truncate(self.status.load(Ordering::Acquire))
    }

    fn store_status(&self, status: StatusBits) {
        self.status.store(status.bits(), Ordering::Release);
    }

    /// Seeds the status word from a journal entry at startup, before any
    /// tick has run. The next tick's `stash_current` observes this as
    /// `prev`, so the first real probe still derives a correct event.
    pub fn restore_status(&self, status: StatusBits) {
        self.store_status(status);
    }
}

/// Consecutive disk-space probe failures tolerated before a server's disk
/// checks are disabled for good.
pub(crate) const MAX_DISK_CHECK_FAILURES: u32 = 3;

/// One backend's monitor-local bookkeeping: previous/pending status, error
/// tracking, and the admin request queue. Maintenance and draining are
/// tracked as independent queued requests, since an operator can put a
/// server into one, the other, or both.
pub struct MonitorServer {
    pub server: Arc<Server>,
    prev: StatusBits,
    pending: StatusBits,
    error_count: u32,
    last_error: Option<String>,
    disk_checks_enabled: bool,
    disk_check_failures: u32,
    last_disk_check: Option<Instant>,
    maint_request: Option<bool>,
    draining_request: Option<bool>,
}

impl MonitorServer {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            prev: StatusBits::empty(),
            pending: StatusBits::empty(),
            error_count: 0,
            last_error: None,
            disk_checks_enabled: true,
            disk_check_failures: 0,
            last_disk_check: None,
            maint_request: None,
            draining_request: None,
        }
    }

    pub fn set_pending(&mut self, mask: StatusBits) {
        self.pending.insert(mask);
    }

    pub fn clear_pending(&mut self, mask: StatusBits) {
        self.pending.remove(mask);
    }

    pub fn pending(&self) -> StatusBits {
        self.pending
    }

    pub fn prev(&self) -> StatusBits {
        self.prev
    }

    /// At tick start, copies the server's currently observable status into
    /// both `prev` and `pending`, then applies any queued admin request.
    pub fn stash_current(&mut self) {
        let current = self.server.status();
        self.prev = current;
        self.pending = current;
        self.apply_admin_request();
    }

    fn apply_admin_request(&mut self) {
        match self.maint_request.take() {
            Some(true) => self.pending.insert(StatusBits::MAINT),
            Some(false) => self.pending.remove(StatusBits::MAINT),
            None => {}
        }
        match self.draining_request.take() {
            Some(true) => self.pending.insert(StatusBits::DRAINING),
            Some(false) => self.pending.remove(StatusBits::DRAINING),
            None => {}
        }
    }

    /// Queues an admin request for the next tick boundary. Does not mutate
    /// `pending` directly, since a tick may be in flight. A maintenance and
    /// a draining request can be queued independently of one another.
    pub fn request(&mut self, request: AdminRequest) {
        match request {
            AdminRequest::None => {}
            AdminRequest::MaintOn => self.maint_request = Some(true),
            AdminRequest::MaintOff => self.maint_request = Some(false),
            AdminRequest::DrainingOn => self.draining_request = Some(true),
            AdminRequest::DrainingOff => self.draining_request = Some(false),
        }
    }

    pub fn status_changed(&self) -> bool {
        self.prev != self.pending
    }

    pub fn get_event_type(&self) -> Option<Event> {
        derive_event(self.prev, self.pending)
    }

    /// Clears the fixed down-mask from `pending`, called when a probe
    /// determines the server is unreachable.
    pub fn mark_down(&mut self) {
        self.pending.remove(super::status::SERVER_DOWN_CLEAR_BITS);
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error_count = 0;
        self.last_error = None;
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn disk_checks_enabled(&self) -> bool {
        self.disk_checks_enabled
    }

    pub fn disable_disk_checks(&mut self) {
        self.disk_checks_enabled = false;
    }

    /// Whether a disk-space probe is due this tick: checks are enabled and
    /// either none has ever run, or `interval` has elapsed since the last.
    pub fn disk_check_due(&self, interval: Duration) -> bool {
        if !self.disk_checks_enabled {
            return false;
        }
        match self.last_disk_check {
            None => true,
            Some(at) => at.elapsed() >= interval,
        }
    }

    /// Records that a disk-space probe ran just now and succeeded, resetting
    /// the failure streak.
    pub fn note_disk_check_success(&mut self) {
        self.last_disk_check = Some(Instant::now());
        self.disk_check_failures = 0;
    }

    /// Records a failed disk-space probe. Self-disables after
    /// [`MAX_DISK_CHECK_FAILURES`] consecutive failures, per the
    /// "stop probing this server" requirement.
    pub fn note_disk_check_failure(&mut self) {
        self.last_disk_check = Some(Instant::now());
        self.disk_check_failures += 1;
        if self.disk_check_failures >= MAX_DISK_CHECK_FAILURES {
            self.disable_disk_checks();
        }
    }

    /// Publishes `pending` as the server's new observable status, ending
    /// the tick for this server.
    pub fn commit(&mut self) {
        self.server.store_status(self.pending);
    }

    pub fn update_disk_space_status(&mut self, used_bytes: u64, limit_bytes: u64) {
        if !self.disk_checks_enabled {
            return;
        }
        if limit_bytes > 0 && used_bytes >= limit_bytes {
            self.pending.insert(StatusBits::DISK_SPACE_EXHAUSTED);
        } else {
            self.pending.remove(StatusBits::DISK_SPACE_EXHAUSTED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_server() -> MonitorServer {
        let server = Arc::new(Server::new("db1", "127.0.0.1:3306".parse().unwrap()));
        MonitorServer::new(server)
    }

    #[test]
    fn admin_request_applies_only_at_stash() {
        let mut ms = monitor_server();
        ms.request(AdminRequest::MaintOn);
        assert!(!ms.pending().contains(StatusBits::MAINT));
        ms.stash_current();
        assert!(ms.pending().contains(StatusBits::MAINT));
    }

    #[test]
    fn commit_publishes_pending_to_server() {
        let mut ms = monitor_server();
        ms.stash_current();
        ms.set_pending(StatusBits::RUNNING | StatusBits::MASTER);
        ms.commit();
        assert_eq!(ms.server.status(), StatusBits::RUNNING | StatusBits::MASTER);
    }

    #[test]
    fn mark_down_clears_role_and_running_bits() {
        let mut ms = monitor_server();
        ms.stash_current();
        ms.set_pending(StatusBits::RUNNING | StatusBits::MASTER | StatusBits::DISK_SPACE_EXHAUSTED);
        ms.mark_down();
        assert!(!ms.pending().contains(StatusBits::RUNNING));
        assert!(!ms.pending().contains(StatusBits::MASTER));
        assert!(ms.pending().contains(StatusBits::DISK_SPACE_EXHAUSTED));
    }

    #[test]
    fn maint_and_draining_requests_apply_independently() {
        let mut ms = monitor_server();
        ms.request(AdminRequest::MaintOn);
        ms.request(AdminRequest::DrainingOn);
        ms.stash_current();
        assert!(ms.pending().contains(StatusBits::MAINT));
        assert!(ms.pending().contains(StatusBits::DRAINING));
    }

    #[test]
    fn status_changed_reflects_prev_pending_diff() {
        let mut ms = monitor_server();
        ms.stash_current();
        assert!(!ms.status_changed());
        ms.set_pending(StatusBits::RUNNING);
        assert!(ms.status_changed());
    }
}
