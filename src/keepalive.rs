//! An ambient, purely observational counter of events a connection has
//! sent via [`crate::connection::Connection::send_event`].
//!
//! Grounded in the teacher's `client::keepalive::KeepAliveManager`
//! (`client/keepalive.rs`), which tracks `enquire_link` ping/pong counts
//! and consecutive failures to drive liveness checks. The wire protocol
//! here has no liveness framelet of its own, so there is nothing to ping
//! and no failure threshold to enforce; what survives is the teacher's
//! habit of keeping lightweight, atomically-updated traffic counters
//! alongside a connection. Off by default, since most embedders have no
//! use for it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Connection-level stats snapshot, mirroring the shape of the teacher's
/// `KeepAliveStatus` minus the fields that depend on a liveness PDU this
/// protocol doesn't have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveStatus {
    pub enabled: bool,
    pub events_sent: u64,
}

/// Tracks how many `Event`-tagged frames a connection has sent. Purely
/// observational: nothing in the connection state machine reads this to
/// make a decision.
#[derive(Debug, Default)]
pub struct KeepAlive {
    enabled: AtomicBool,
    events_sent: AtomicU64,
}

impl KeepAlive {
    pub fn new() -> Self {
        KeepAlive {
            enabled: AtomicBool::new(false),
            events_sent: AtomicU64::new(0),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Record that an event was sent. A no-op while disabled, so callers
    /// can unconditionally call this from the send path without an
    /// extra branch at the call site.
    pub fn record_event_sent(&self) {
        if self.is_enabled() {
            self.events_sent.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn status(&self) -> KeepAliveStatus {
        KeepAliveStatus {
            enabled: self.is_enabled(),
            events_sent: self.events_sent.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default_and_does_not_count() {
        let keep_alive = KeepAlive::new();
        assert!(!keep_alive.is_enabled());
        keep_alive.record_event_sent();
        assert_eq!(keep_alive.status().events_sent, 0);
    }

    #[test]
    fn counts_events_once_enabled() {
        let keep_alive = KeepAlive::new();
        keep_alive.enable();
        keep_alive.record_event_sent();
        keep_alive.record_event_sent();
        let status = keep_alive.status();
        assert!(status.enabled);
        assert_eq!(status.events_sent, 2);
    }

    #[test]
    fn disabling_stops_further_counting() {
        let keep_alive = KeepAlive::new();
        keep_alive.enable();
        keep_alive.record_event_sent();
        keep_alive.disable();
        keep_alive.record_event_sent();
        assert_eq!(keep_alive.status().events_sent, 1);
    }
}
