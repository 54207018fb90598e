//! Replay ledger: one-time use of authentication token ids.
//!
//! Every authentication token presented to `refresh` carries a `jti`. The
//! ledger records each `jti` it accepts and rejects any later token with the
//! same id while the entry is retained.
//!
//! # Retention
//!
//! An entry is kept until the token's own expiry (plus clock leeway) or a
//! configured minimum retention, whichever is later. Once a token has
//! expired the expiration rule rejects it anyway, so dropping its ledger entry
//! afterwards cannot re-enable a replay. A background task
//! ([`spawn_reaper`]) periodically evicts such entries to bound memory usage.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::debug;

use crate::token::claims::now_epoch_secs;

/// Default minimum retention for ledger entries (5 minutes).
pub const DEFAULT_MIN_RETENTION: Duration = Duration::from_secs(5 * 60);

/// A token id was presented twice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    /// The `jti` is already recorded.
    #[error("Token with ID '{0}' has already been used.")]
    AlreadySeen(String),
}

/// Records consumed token ids.
///
/// `check_and_insert` must be atomic: of two concurrent calls with the same
/// `jti`, exactly one succeeds.
pub trait ReplayLedger: Send + Sync + 'static {
    /// Record `jti`, retaining it at least until `expires_at` (Unix seconds).
    fn check_and_insert(&self, jti: &str, expires_at: u64) -> Result<(), ReplayError>;

    /// Drop entries whose retention has passed. Returns how many were removed.
    fn evict_expired(&self) -> usize;
}

/// `DashMap`-backed ledger: `jti` → retain-until (Unix seconds).
#[derive(Debug)]
pub struct InMemoryReplayLedger {
    seen: DashMap<String, u64>,
    min_retention: Duration,
}

impl InMemoryReplayLedger {
    /// Create an empty ledger with [`DEFAULT_MIN_RETENTION`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_min_retention(DEFAULT_MIN_RETENTION)
    }

    /// Create an empty ledger with a custom minimum retention.
    #[must_use]
    pub fn with_min_retention(min_retention: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            min_retention,
        }
    }

    /// Number of tracked ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// `true` when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for InMemoryReplayLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayLedger for InMemoryReplayLedger {
    fn check_and_insert(&self, jti: &str, expires_at: u64) -> Result<(), ReplayError> {
        let now = now_epoch_secs();
        let retain_until = expires_at.max(now + self.min_retention.as_secs());

        // The entry guard holds the shard lock for the whole check-and-insert.
        match self.seen.entry(jti.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    return Err(ReplayError::AlreadySeen(jti.to_string()));
                }
                entry.insert(retain_until);
                debug!(jti, "Reused stale replay ledger entry");
            }
            Entry::Vacant(entry) => {
                entry.insert(retain_until);
            }
        }
        Ok(())
    }

    fn evict_expired(&self) -> usize {
        let now = now_epoch_secs();
        let before = self.seen.len();
        self.seen.retain(|_, retain_until| *retain_until > now);
        let count = before.saturating_sub(self.seen.len());
        if count > 0 {
            debug!(count, "Evicted expired replay ledger entries");
        }
        count
    }
}

/// Spawn a background task that evicts expired ledger entries every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    ledger: Arc<dyn ReplayLedger>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ledger.evict_expired();
                }
                _ = shutdown.recv() => {
                    debug!("Replay ledger reaper shutting down");
                    break;
                }
            }
        }
    })
}
