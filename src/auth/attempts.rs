//! Failed-login throttling.
//!
//! After `max_attempts` consecutive failures a username is blocked for
//! `block`. While blocked the gate refuses the username without consulting
//! the credential store. A success clears the counter.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
struct AttemptEntry {
    failures: u32,
    last_failure: Instant,
    blocked_until: Option<Instant>,
}

pub struct LoginAttempts {
    max_attempts: u32,
    block: Duration,
    entries: DashMap<String, AttemptEntry>,
}

impl LoginAttempts {
    /// `max_attempts == 0` disables blocking.
    pub fn new(max_attempts: u32, block: Duration) -> Self {
        Self {
            max_attempts,
            block,
            entries: DashMap::new(),
        }
    }

    pub fn is_blocked(&self, username: &str) -> bool {
        let now = Instant::now();
        let expired = match self.entries.get(username) {
            Some(entry) => match entry.blocked_until {
                Some(until) if now < until => return true,
                Some(_) => true,
                None => false,
            },
            None => return false,
        };
        // the guard from `get` is gone by now
        if expired {
            self.entries.remove(username);
        }
        false
    }

    pub fn register_failure(&self, username: &str) {
        if self.max_attempts == 0 {
            return;
        }
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(username.to_string())
            .or_insert(AttemptEntry {
                failures: 0,
                last_failure: now,
                blocked_until: None,
            });
        entry.failures += 1;
        entry.last_failure = now;
        if entry.failures >= self.max_attempts && entry.blocked_until.is_none() {
            entry.blocked_until = Some(now + self.block);
            tracing::warn!(
                username = %username,
                failures = entry.failures,
                block_secs = self.block.as_secs(),
                "login blocked after repeated failures"
            );
        }
    }

    pub fn reset(&self, username: &str) {
        self.entries.remove(username);
    }

    /// Drop expired blocks and failure counters idle for longer than the
    /// block window. Returns how many entries were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| match e.blocked_until {
            Some(until) => until > now,
            None => now.duration_since(e.last_failure) < self.block,
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
