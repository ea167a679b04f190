//! Connection identity and live-connection accounting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::debug;

/// Relaxed ordering is enough: ids only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts connections currently being served.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. The returned guard unregisters it on drop,
    /// whichever way the connection task ends.
    pub fn track(&self, peer: SocketAddr) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ConnectionGuard {
            id: ConnectionId::next(),
            peer,
            opened_at: Instant::now(),
            active: Arc::clone(&self.active),
        };
        debug!("Connection opened: {} from {peer}", guard.id);
        guard
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ConnectionGuard {
    id: ConnectionId,
    peer: SocketAddr,
    opened_at: Instant,
    active: Arc<AtomicU64>,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(
            "Connection closed: {} from {} after {:?} (active: {remaining})",
            self.id,
            self.peer,
            self.opened_at.elapsed()
        );
    }
}
