//! Per-UID retry backoff
//!
//! Failed convergence operations retry on later ticks, no sooner than
//! `min(cap, base * 2^(n-1))` after the n-th consecutive failure.

use crate::models::Backend;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const BACKOFF_CAP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Entry {
    failures: u32,
    not_before: Instant,
}

/// Tracks failure streaks per (backend, uid).
#[derive(Debug, Default)]
pub struct BackoffTable {
    entries: HashMap<(Backend, String), Entry>,
}

impl BackoffTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an operation for this UID may be issued now.
    pub fn ready(&self, backend: Backend, uid: &str) -> bool {
        match self.entries.get(&(backend, uid.to_string())) {
            Some(entry) => Instant::now() >= entry.not_before,
            None => true,
        }
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn record_failure(&mut self, backend: Backend, uid: &str) -> Duration {
        let entry = self
            .entries
            .entry((backend, uid.to_string()))
            .or_insert(Entry {
                failures: 0,
                not_before: Instant::now(),
            });

        entry.failures += 1;
        let delay = delay_for(entry.failures);
        entry.not_before = Instant::now() + delay;
        delay
    }

    pub fn record_success(&mut self, backend: Backend, uid: &str) {
        self.entries.remove(&(backend, uid.to_string()));
    }

    /// Current consecutive failure count, for status reporting.
    pub fn failures(&self, backend: Backend, uid: &str) -> u32 {
        self.entries
            .get(&(backend, uid.to_string()))
            .map(|entry| entry.failures)
            .unwrap_or(0)
    }
}

fn delay_for(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(6);
    let delay = BACKOFF_BASE * 2u32.pow(exponent);
    delay.min(BACKOFF_CAP)
}
