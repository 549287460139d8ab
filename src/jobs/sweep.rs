//! Background job: drop expired login-attempt entries.
//!
//! Blocked usernames are already released lazily on their next attempt;
//! this keeps usernames that never come back from accumulating.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::auth::LoginAttempts;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the sweep task. Call this once at startup.
pub fn spawn(attempts: Arc<LoginAttempts>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            sweep(&attempts);
        }
    })
}

fn sweep(attempts: &LoginAttempts) -> usize {
    let evicted = attempts.evict_expired();
    if evicted > 0 {
        tracing::debug!(evicted, remaining = attempts.len(), "swept login attempt entries");
    }
    evicted
}
