// src/core/monitor/status.rs

//! Server status bits and the event derivation table that turns a
//! `(previous, pending)` status pair into a named transition.

use bitflags::bitflags;

bitflags! {
    /// A backend's role/health status, read atomically by anything that
    /// routes to it and written only by the monitor that owns it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusBits: u32 {
        const RUNNING              = 1 << 0;
        const AUTH_ERROR           = 1 << 1;
        const MASTER               = 1 << 2;
        const SLAVE                = 1 << 3;
        const SLAVE_OF_EXT_MASTER  = 1 << 4;
        const RELAY                = 1 << 5;
        const JOINED               = 1 << 6;
        const BLR                  = 1 << 7;
        const DISK_SPACE_EXHAUSTED = 1 << 8;
        const MAINT                = 1 << 9;
        const DRAINING             = 1 << 10;
    }
}

/// Cleared on detected downtime: a server that just went down cannot still
/// claim to be running, nor hold any replication role bit.
pub const SERVER_DOWN_CLEAR_BITS: StatusBits = StatusBits::from_bits_truncate(
    StatusBits::RUNNING.bits()
        | StatusBits::AUTH_ERROR.bits()
        | StatusBits::MASTER.bits()
        | StatusBits::SLAVE.bits()
        | StatusBits::SLAVE_OF_EXT_MASTER.bits()
        | StatusBits::RELAY.bits()
        | StatusBits::JOINED.bits(),
);

/// A role bit, in tie-break priority order: a server with more than one role
/// bit set is treated as whichever of these comes first.
const ROLE_PRIORITY: [StatusBits; 5] = [
    StatusBits::MASTER,
    StatusBits::SLAVE,
    StatusBits::JOINED,
    StatusBits::RELAY,
    StatusBits::BLR,
];

fn dominant_role(status: StatusBits) -> Option<StatusBits> {
    ROLE_PRIORITY.into_iter().find(|&bit| status.contains(bit))
}

/// A named monitor event, derived from a backend's status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    MasterDown,
    MasterUp,
    SlaveDown,
    SlaveUp,
    ServerDown,
    ServerUp,
    SyncedDown,
    SyncedUp,
    LostMaster,
    LostSlave,
    LostSynced,
    NewMaster,
    NewSlave,
    NewSynced,
}

impl Event {
    /// The lowercase name used in configured event masks and script
    /// substitution, e.g. `master_down`.
    pub fn name(&self) -> &'static str {
        match self {
            Event::MasterDown => "master_down",
            Event::MasterUp => "master_up",
            Event::SlaveDown => "slave_down",
            Event::SlaveUp => "slave_up",
            Event::ServerDown => "server_down",
            Event::ServerUp => "server_up",
            Event::SyncedDown => "synced_down",
            Event::SyncedUp => "synced_up",
            Event::LostMaster => "lost_master",
            Event::LostSlave => "lost_slave",
            Event::LostSynced => "lost_synced",
            Event::NewMaster => "new_master",
            Event::NewSlave => "new_slave",
            Event::NewSynced => "new_synced",
        }
    }
}

/// Derives the monitor event for a status transition, or `None` if nothing
/// meaningful changed. A deterministic function of `(prev, pending)`, per
/// the role tie-break order MASTER > SLAVE > JOINED > RELAY > BLR.
pub fn derive_event(prev: StatusBits, pending: StatusBits) -> Option<Event> {
    let was_running = prev.contains(StatusBits::RUNNING);
    let is_running = pending.contains(StatusBits::RUNNING);
    let prev_role = dominant_role(prev);
    let new_role = dominant_role(pending);

    match (was_running, is_running) {
        (false, true) => Some(match new_role {
            Some(StatusBits::MASTER) => Event::MasterUp,
            Some(StatusBits::SLAVE) => Event::SlaveUp,
            Some(StatusBits::JOINED) => Event::SyncedUp,
            _ => Event::ServerUp,
        }),
        (true, false) => Some(match prev_role {
            Some(StatusBits::MASTER) => Event::MasterDown,
            Some(StatusBits::SLAVE) => Event::SlaveDown,
            Some(StatusBits::JOINED) => Event::SyncedDown,
            _ => Event::ServerDown,
        }),
        // Still running with a different dominant role: a role now present
        // is always "gained" (NEW_*), even if it outranks or is outranked by
        // whatever was previously dominant. Only dropping to no role at all
        // counts as "lost" (LOST_*).
        (true, true) if prev_role != new_role => match new_role {
            Some(StatusBits::MASTER) => Some(Event::NewMaster),
            Some(StatusBits::SLAVE) => Some(Event::NewSlave),
            Some(StatusBits::JOINED) => Some(Event::NewSynced),
            Some(_) => None,
            None => match prev_role {
                Some(StatusBits::MASTER) => Some(Event::LostMaster),
                Some(StatusBits::SLAVE) => Some(Event::LostSlave),
                Some(StatusBits::JOINED) => Some(Event::LostSynced),
                _ => None,
            },
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_to_running_master_is_master_up() {
        let prev = StatusBits::empty();
        let pending = StatusBits::RUNNING | StatusBits::MASTER;
        assert_eq!(derive_event(prev, pending), Some(Event::MasterUp));
    }

    #[test]
    fn running_master_to_down_is_master_down() {
        let prev = StatusBits::RUNNING | StatusBits::MASTER;
        let pending = StatusBits::empty();
        assert_eq!(derive_event(prev, pending), Some(Event::MasterDown));
    }

    #[test]
    fn running_master_to_running_is_lost_master() {
        let prev = StatusBits::RUNNING | StatusBits::MASTER;
        let pending = StatusBits::RUNNING;
        assert_eq!(derive_event(prev, pending), Some(Event::LostMaster));
    }

    #[test]
    fn running_master_to_running_slave_is_new_slave() {
        let prev = StatusBits::RUNNING | StatusBits::MASTER;
        let pending = StatusBits::RUNNING | StatusBits::SLAVE;
        assert_eq!(derive_event(prev, pending), Some(Event::NewSlave));
    }

    #[test]
    fn running_slave_to_running_master_is_new_master() {
        let prev = StatusBits::RUNNING | StatusBits::SLAVE;
        let pending = StatusBits::RUNNING | StatusBits::MASTER;
        assert_eq!(derive_event(prev, pending), Some(Event::NewMaster));
    }

    #[test]
    fn running_slave_to_down_is_slave_down() {
        let prev = StatusBits::RUNNING | StatusBits::SLAVE;
        let pending = StatusBits::empty();
        assert_eq!(derive_event(prev, pending), Some(Event::SlaveDown));
    }

    #[test]
    fn running_joined_to_down_is_synced_down() {
        let prev = StatusBits::RUNNING | StatusBits::JOINED;
        let pending = StatusBits::empty();
        assert_eq!(derive_event(prev, pending), Some(Event::SyncedDown));
    }

    #[test]
    fn running_to_running_master_is_new_master() {
        let prev = StatusBits::RUNNING;
        let pending = StatusBits::RUNNING | StatusBits::MASTER;
        assert_eq!(derive_event(prev, pending), Some(Event::NewMaster));
    }

    #[test]
    fn no_change_derives_no_event() {
        let status = StatusBits::RUNNING | StatusBits::SLAVE;
        assert_eq!(derive_event(status, status), None);
    }

    #[test]
    fn master_and_slave_bits_together_resolve_via_tie_break() {
        let prev = StatusBits::RUNNING | StatusBits::MASTER | StatusBits::SLAVE;
        let pending = StatusBits::empty();
        assert_eq!(derive_event(prev, pending), Some(Event::MasterDown));
    }

    #[test]
    fn down_clear_bits_strip_running_and_role_bits() {
        let status = StatusBits::RUNNING | StatusBits::MASTER | StatusBits::DISK_SPACE_EXHAUSTED;
        let cleared = status & !SERVER_DOWN_CLEAR_BITS;
        assert!(!cleared.contains(StatusBits::RUNNING));
        assert!(!cleared.contains(StatusBits::MASTER));
        assert!(cleared.contains(StatusBits::DISK_SPACE_EXHAUSTED));
    }
}
