//! Registry of live connections.
//!
//! Every accepted connection holds a [`ClientGuard`] for its whole life. The
//! guard removes the registry entry when dropped, which covers every exit
//! path of the connection task. [`ActiveClients::close_all`] asks each live
//! connection to close; the connection task reacts by dropping its stream.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// A tracked connection.
#[derive(Debug, Clone)]
pub struct ActiveClient {
    /// Peer address of the socket.
    pub addr: SocketAddr,
    /// When the connection was accepted.
    pub connected_at: Instant,
    closer: Arc<Notify>,
}

impl ActiveClient {
    /// The client's IP, used as its rate-limiting identity.
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Live connections keyed by an internal id.
#[derive(Debug, Default)]
pub struct ActiveClients {
    next_id: AtomicU64,
    clients: Mutex<HashMap<u64, ActiveClient>>,
}

impl ActiveClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly accepted connection.
    pub fn register(self: &Arc<Self>, addr: SocketAddr) -> ClientGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let closer = Arc::new(Notify::new());
        self.lock().insert(
            id,
            ActiveClient {
                addr,
                connected_at: Instant::now(),
                closer: Arc::clone(&closer),
            },
        );
        ClientGuard {
            id,
            addr,
            closer,
            registry: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// A copy of every tracked connection.
    pub fn snapshot(&self) -> Vec<ActiveClient> {
        self.lock().values().cloned().collect()
    }

    /// Signal every tracked connection to close and forget them all.
    ///
    /// Returns how many connections were signalled.
    pub fn close_all(&self) -> usize {
        let mut clients = self.lock();
        for client in clients.values() {
            client.closer.notify_one();
        }
        let closed = clients.len();
        clients.clear();
        closed
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, ActiveClient>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a connection registered until dropped.
#[derive(Debug)]
pub struct ClientGuard {
    id: u64,
    addr: SocketAddr,
    closer: Arc<Notify>,
    registry: Arc<ActiveClients>,
}

impl ClientGuard {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Resolves once [`ActiveClients::close_all`] has signalled this connection.
    ///
    /// A signal sent before this is awaited is not lost.
    pub async fn closed(&self) {
        self.closer.notified().await;
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
