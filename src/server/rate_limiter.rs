//! Per-client request rate limiting.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default window over which requests are counted.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct ClientWindow {
    count: u32,
    last_request: Instant,
}

/// Counts requests per client and denies clients that exceed a maximum.
///
/// A client's count only resets once it has been idle for a whole window:
/// every call first purges clients whose last request is at least one window
/// old, then checks the caller's count, and only increments it when the
/// request is allowed. A client that bursts to the limit is therefore blocked
/// until a window has passed since its last allowed request.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<String, ClientWindow>>,
}

impl RateLimiter {
    /// A limiter allowing `max_requests_per_minute` per client. Zero disables limiting.
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self::with_window(max_requests_per_minute, DEFAULT_WINDOW)
    }

    /// A limiter with a custom window length.
    pub fn with_window(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a request from `client_id` and report whether it may proceed.
    pub fn allow_request(&self, client_id: &str) -> bool {
        self.allow_request_at(client_id, Instant::now())
    }

    fn allow_request_at(&self, client_id: &str, now: Instant) -> bool {
        if self.max_requests == 0 {
            return true;
        }

        let mut clients = self.lock();
        clients.retain(|_, client| now.saturating_duration_since(client.last_request) < self.window);

        match clients.get_mut(client_id) {
            Some(client) if client.count >= self.max_requests => false,
            Some(client) => {
                client.count += 1;
                client.last_request = now;
                true
            }
            None => {
                clients.insert(
                    client_id.to_string(),
                    ClientWindow {
                        count: 1,
                        last_request: now,
                    },
                );
                true
            }
        }
    }

    /// Number of clients with live state.
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    /// Forget every client.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientWindow>> {
        // The map stays consistent even if a holder panicked.
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
