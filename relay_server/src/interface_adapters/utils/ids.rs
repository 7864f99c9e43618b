use crate::use_cases::ConnectionId;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// Hands out connection ids for one server instance.
///
/// The counter starts at the current time in nanoseconds, so ids from restarts of the
/// same process rarely collide in aggregated logs.
#[derive(Debug)]
pub struct ConnectionIds {
    next: AtomicU64,
}

impl ConnectionIds {
    pub fn starting_at(first: ConnectionId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn seeded_from_clock() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self::starting_at(nanos)
    }

    /// Unique within this allocator; also the hub registration key.
    pub fn allocate(&self) -> ConnectionId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
