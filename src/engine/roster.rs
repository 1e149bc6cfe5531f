use std::{net::SocketAddr, sync::Arc};

use crate::error::EngineError;

/// Attempts after which an address that never succeeded is skipped.
pub const BROKEN_ATTEMPTS_THRESHOLD: u64 = 10;

/// Dial history of one remote address, as seen by a single worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStats {
    pub connection_attempts: u64,
    pub connection_failures: u64,
    pub(crate) write_failure_reported: bool,
}

impl RemoteStats {
    /// More than ten attempts, every one of them failed.
    pub fn is_broken(&self) -> bool {
        self.connection_attempts > BROKEN_ATTEMPTS_THRESHOLD
            && self.connection_failures == self.connection_attempts
    }

    /// Returns true for the first failure of this address.
    pub(crate) fn record_failure(&mut self) -> bool {
        self.connection_failures += 1;
        self.connection_failures == 1
    }

    /// Returns true if no non-broken-pipe write error was reported yet.
    pub(crate) fn claim_write_report(&mut self) -> bool {
        !std::mem::replace(&mut self.write_failure_reported, true)
    }
}

/// Remote addresses plus the owning worker's private health counters.
#[derive(Debug, Clone)]
pub struct Roster {
    addresses: Arc<[SocketAddr]>,
    stats: Vec<RemoteStats>,
    cursor: usize,
}

impl Roster {
    pub fn new(addresses: Arc<[SocketAddr]>, start_offset: usize) -> Result<Self, EngineError> {
        if addresses.is_empty() {
            return Err(EngineError::EmptyRoster);
        }
        let stats = vec![RemoteStats::default(); addresses.len()];
        Ok(Self {
            addresses,
            stats,
            cursor: start_offset,
        })
    }

    pub fn address(&self, index: usize) -> SocketAddr {
        self.addresses[index]
    }

    pub fn stats(&self, index: usize) -> &RemoteStats {
        &self.stats[index]
    }

    pub(crate) fn stats_mut(&mut self, index: usize) -> &mut RemoteStats {
        &mut self.stats[index]
    }

    pub fn snapshot(&self) -> Vec<RemoteStats> {
        self.stats.clone()
    }

    /// Picks the next address to dial, round-robin from the cursor.
    ///
    /// Broken addresses are skipped. When every candidate is broken the
    /// last one examined is returned anyway.
    pub fn select_next(&mut self) -> usize {
        let n = self.addresses.len();
        let mut off = 0;
        for _ in 0..n {
            off = self.cursor % n;
            self.cursor = self.cursor.wrapping_add(1);
            if !self.stats[off].is_broken() {
                break;
            }
        }
        off
    }
}
