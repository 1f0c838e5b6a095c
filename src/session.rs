//! Per-connection context and counters

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

// Process-wide id allocator; ids are never reused within a run
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_conn_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Context owned by one accepted SOCKS5 connection.
///
/// The destination is fixed at CONNECT time; counters only grow.
pub struct ConnContext {
    pub id: u64,
    pub peer: SocketAddr,
    pub dest: String,
    pub start: Instant,
    up_bytes: AtomicU64,
    up_packets: AtomicU64,
    down_bytes: AtomicU64,
    down_packets: AtomicU64,
}

impl ConnContext {
    pub fn new(id: u64, peer: SocketAddr, dest: String) -> Self {
        ConnContext {
            id,
            peer,
            dest,
            start: Instant::now(),
            up_bytes: AtomicU64::new(0),
            up_packets: AtomicU64::new(0),
            down_bytes: AtomicU64::new(0),
            down_packets: AtomicU64::new(0),
        }
    }

    pub fn add_up(&self, bytes: u64) {
        self.up_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.up_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_down(&self, bytes: u64) {
        self.down_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.down_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn up_bytes(&self) -> u64 {
        self.up_bytes.load(Ordering::Relaxed)
    }

    pub fn down_bytes(&self) -> u64 {
        self.down_bytes.load(Ordering::Relaxed)
    }

    pub fn up_packets(&self) -> u64 {
        self.up_packets.load(Ordering::Relaxed)
    }

    pub fn down_packets(&self) -> u64 {
        self.down_packets.load(Ordering::Relaxed)
    }
}
