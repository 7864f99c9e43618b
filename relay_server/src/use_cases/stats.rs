// Process-wide relay counters, shared by every connection and the hub.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RelayStats {
    connections_accepted: AtomicU64,
    connections_closed: AtomicU64,
    frames_forwarded: AtomicU64,
    // Frames that failed to decode.
    frames_dropped: AtomicU64,
    // Frames that decoded but are never relayed from a client (Init).
    frames_rejected: AtomicU64,
    peers_evicted: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`] for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub connections_live: u64,
    pub frames_forwarded: u64,
    pub frames_dropped: u64,
    pub frames_rejected: u64,
    pub peers_evicted: u64,
}

impl RelayStats {
    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_forwarded(&self) {
        self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the running total so callers can log it.
    pub fn frame_dropped(&self) -> u64 {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peer_evicted(&self) {
        self.peers_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let accepted = self.connections_accepted.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);
        StatsSnapshot {
            connections_accepted: accepted,
            connections_live: accepted.saturating_sub(closed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            peers_evicted: self.peers_evicted.load(Ordering::Relaxed),
        }
    }
}
