//! Engine-wide traffic counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated by every worker
#[derive(Debug, Default)]
pub struct NetworkStats {
    read_bytes: AtomicU64,
    read_packets: AtomicU64,
    written_bytes: AtomicU64,
    written_packets: AtomicU64,
    dropped_by_policy: AtomicU64,
    dropped_by_full: AtomicU64,
    accepted_connections: AtomicU64,
    refused_connections: AtomicU64,
}

/// Point-in-time copy of [`NetworkStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatsSnapshot {
    /// Bytes read from sockets
    pub read_bytes: u64,
    /// Messages decoded
    pub read_packets: u64,
    /// Bytes written to sockets
    pub written_bytes: u64,
    /// Packets fully written
    pub written_packets: u64,
    /// Packets refused by a queue policy
    pub dropped_by_policy: u64,
    /// Packets refused because a queue was full
    pub dropped_by_full: u64,
    /// TCP connections accepted
    pub accepted_connections: u64,
    /// TCP connections refused by the filter
    pub refused_connections: u64,
}

impl NetworkStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count bytes read
    pub fn add_read_bytes(&self, bytes: usize) {
        self.read_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count decoded messages
    pub fn add_read_packets(&self, count: u64) {
        self.read_packets.fetch_add(count, Ordering::Relaxed);
    }

    /// Count bytes written
    pub fn add_written_bytes(&self, bytes: usize) {
        self.written_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count fully written packets
    pub fn add_written_packets(&self, count: u64) {
        self.written_packets.fetch_add(count, Ordering::Relaxed);
    }

    /// Count a packet refused by a queue policy
    pub fn add_dropped_by_policy(&self) {
        self.dropped_by_policy.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a packet refused or evicted by a full queue
    pub fn add_dropped_by_full(&self) {
        self.dropped_by_full.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an accepted connection
    pub fn add_accepted_connection(&self) {
        self.accepted_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a connection refused by the filter
    pub fn add_refused_connection(&self) {
        self.refused_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter
    pub fn snapshot(&self) -> NetworkStatsSnapshot {
        NetworkStatsSnapshot {
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            read_packets: self.read_packets.load(Ordering::Relaxed),
            written_bytes: self.written_bytes.load(Ordering::Relaxed),
            written_packets: self.written_packets.load(Ordering::Relaxed),
            dropped_by_policy: self.dropped_by_policy.load(Ordering::Relaxed),
            dropped_by_full: self.dropped_by_full.load(Ordering::Relaxed),
            accepted_connections: self.accepted_connections.load(Ordering::Relaxed),
            refused_connections: self.refused_connections.load(Ordering::Relaxed),
        }
    }
}

impl NetworkStatsSnapshot {
    /// Total packets dropped at admission
    pub fn dropped_packets(&self) -> u64 {
        self.dropped_by_policy + self.dropped_by_full
    }
}
