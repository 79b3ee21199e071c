//! Server pool: the set of known endpoints, and the round-robin/backoff
//! bookkeeping the connection manager uses to pick the next one to dial.
//!
//! Endpoints discovered from a server's `INFO.connect_urls` are merged in
//! alongside the ones the caller configured explicitly; the manager never
//! discards a configured endpoint, only adds to the pool.

use std::time::{Duration, Instant};

use rand::seq::SliceRandom;

use crate::client::url::{parse_server_list, Endpoint};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Configured,
    Discovered,
}

#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub endpoint: Endpoint,
    pub origin: Origin,
    pub failures: u32,
    pub last_attempt: Option<Instant>,
}

impl PoolEntry {
    fn new(endpoint: Endpoint, origin: Origin) -> Self {
        Self { endpoint, origin, failures: 0, last_attempt: None }
    }
}

/// Tracks every known server and where the pool's round-robin cursor is.
#[derive(Debug)]
pub struct ServerPool {
    entries: Vec<PoolEntry>,
    cursor: usize,
    randomize: bool,
}

impl ServerPool {
    pub fn new(servers: &str, randomize: bool) -> Result<Self> {
        let mut entries: Vec<PoolEntry> = parse_server_list(servers)?
            .into_iter()
            .map(|ep| PoolEntry::new(ep, Origin::Configured))
            .collect();
        if randomize {
            entries.shuffle(&mut rand::thread_rng());
        }
        Ok(Self { entries, cursor: 0, randomize })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Merges newly-discovered endpoints (from `INFO.connect_urls`) into the
    /// pool, skipping any that match an endpoint already known by authority.
    pub fn merge_discovered(&mut self, urls: &[String]) {
        for raw in urls {
            let Ok(ep) = crate::client::url::parse_server_url(raw) else { continue };
            if self.entries.iter().any(|e| e.endpoint.authority() == ep.authority()) {
                continue;
            }
            self.entries.push(PoolEntry::new(ep, Origin::Discovered));
        }
        if self.randomize {
            self.entries.shuffle(&mut rand::thread_rng());
        }
    }

    /// Advances the round-robin cursor and returns the next candidate to
    /// dial, skipping nothing — exhausted endpoints are still retried, since
    /// `max_reconnect_attempts` governs giving up, not this cursor.
    pub fn next_candidate(&mut self) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = self.cursor % self.entries.len();
        self.cursor = self.cursor.wrapping_add(1);
        Some(idx)
    }

    pub fn endpoint(&self, idx: usize) -> &Endpoint {
        &self.entries[idx].endpoint
    }

    pub fn mark_attempt(&mut self, idx: usize) {
        self.entries[idx].last_attempt = Some(Instant::now());
    }

    pub fn mark_success(&mut self, idx: usize) {
        self.entries[idx].failures = 0;
    }

    pub fn mark_failure(&mut self, idx: usize) {
        self.entries[idx].failures = self.entries[idx].failures.saturating_add(1);
    }

    /// Whether every endpoint has exceeded `max_reconnect_attempts`. Negative
    /// means unlimited attempts (never exhausted); zero means an endpoint is
    /// exhausted after its very first failure.
    pub fn exhausted(&self, max_reconnect_attempts: i64) -> bool {
        if max_reconnect_attempts < 0 || self.entries.is_empty() {
            return false;
        }
        let needed = if max_reconnect_attempts == 0 { 1 } else { max_reconnect_attempts as u32 };
        self.entries.iter().all(|e| e.failures >= needed)
    }
}

/// Exponential backoff with jitter, shared by the connection manager between
/// reconnect attempts against the same or a different pool entry.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// internal attempt counter. Jitter is +/-20% to avoid a reconnect storm
    /// when many clients lose the same server at once.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base.saturating_mul(1u32.checked_shl(self.attempt).unwrap_or(u32::MAX));
        let capped = exp.min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        let jitter_frac = rand::random::<f64>() * 0.4 - 0.2;
        let millis = capped.as_millis() as f64 * (1.0 + jitter_frac);
        Duration::from_millis(millis.max(0.0) as u64)
    }
}
