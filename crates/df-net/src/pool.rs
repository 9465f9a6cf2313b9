//! Idle keep-alive connection pool.

use crate::transport::BoxedIoStream;
use crate::url::NetworkUrl;
use crate::url::Scheme;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

/// Connections are only shared between requests with the same key.
///
/// `verified` separates sockets opened under strict and relaxed TLS so a
/// relaxed session is never handed to a strict request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub verified: bool,
}

impl ConnectionKey {
    pub fn from_url(url: &NetworkUrl, verified: bool) -> Self {
        Self {
            scheme: url.scheme(),
            host: url.host().to_ascii_lowercase(),
            port: url.port(),
            verified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub keys: usize,
    pub idle_connections: usize,
}

pub trait ConnectionPool {
    fn checkout(&mut self, key: &ConnectionKey) -> Option<BoxedIoStream>;
    fn checkin(&mut self, key: ConnectionKey, stream: BoxedIoStream);
    fn clear(&mut self);
    fn stats(&self) -> PoolStats;
}

struct IdleConnection {
    stream: BoxedIoStream,
    parked_at: Instant,
}

/// In-memory pool capped per key. Connections idle longer than
/// `max_idle_age` are dropped at checkout instead of reused.
pub struct InMemoryConnectionPool {
    max_idle_per_key: usize,
    max_idle_age: Duration,
    idle: HashMap<ConnectionKey, VecDeque<IdleConnection>>,
}

impl InMemoryConnectionPool {
    pub fn new(max_idle_per_key: usize, max_idle_age: Duration) -> Self {
        Self {
            max_idle_per_key,
            max_idle_age,
            idle: HashMap::new(),
        }
    }
}

impl Default for InMemoryConnectionPool {
    fn default() -> Self {
        Self::new(6, Duration::from_secs(30))
    }
}

impl ConnectionPool for InMemoryConnectionPool {
    fn checkout(&mut self, key: &ConnectionKey) -> Option<BoxedIoStream> {
        let queue = self.idle.get_mut(key)?;
        let now = Instant::now();
        let mut found = None;

        // Most recently parked first; older sockets are likelier to be closed.
        while let Some(idle) = queue.pop_back() {
            if now.duration_since(idle.parked_at) <= self.max_idle_age {
                found = Some(idle.stream);
                break;
            }
        }

        if queue.is_empty() {
            self.idle.remove(key);
        }

        found
    }

    fn checkin(&mut self, key: ConnectionKey, stream: BoxedIoStream) {
        if self.max_idle_per_key == 0 {
            return;
        }

        let queue = self.idle.entry(key).or_default();
        if queue.len() >= self.max_idle_per_key {
            queue.pop_front();
        }
        queue.push_back(IdleConnection {
            stream,
            parked_at: Instant::now(),
        });
    }

    fn clear(&mut self) {
        self.idle.clear();
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            keys: self.idle.len(),
            idle_connections: self.idle.values().map(VecDeque::len).sum(),
        }
    }
}
