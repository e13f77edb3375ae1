use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};

use super::RecentlySeenStore;
use crate::error::Result;
use crate::models::Impression;

/// Process-local recently-seen store.
///
/// Maps identity key to the last time it was marked. Expired entries are
/// removed when read; nothing sweeps the map in the background, so keys that
/// are never read again stay until the process exits.
///
/// Cloning shares the same map.
#[derive(Clone)]
pub struct InMemoryRecentlySeenStore {
    seen: Arc<DashMap<String, Instant>>,
    ttl: Duration,
}

impl InMemoryRecentlySeenStore {
    pub fn new(ttl: Duration) -> Self {
        info!("Initializing in-memory recently-seen store with TTL: {:?}", ttl);
        Self {
            seen: Arc::new(DashMap::new()),
            ttl,
        }
    }

    fn contains(&self, key: &str, now: Instant) -> bool {
        let last_seen = match self.seen.get(key) {
            Some(entry) => *entry.value(),
            None => return false,
        };

        if now.duration_since(last_seen) > self.ttl {
            // Re-check under the shard lock; a concurrent add may have refreshed it
            let ttl = self.ttl;
            if self
                .seen
                .remove_if(key, |_, t| now.duration_since(*t) > ttl)
                .is_some()
            {
                debug!(key = %key, "Expired recently-seen entry evicted");
            }
            return false;
        }

        true
    }

    /// Number of tracked entries, expired ones included.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[async_trait]
impl RecentlySeenStore for InMemoryRecentlySeenStore {
    async fn has(&self, impression: &Impression) -> Result<bool> {
        Ok(self.contains(&impression.identity_key(), Instant::now()))
    }

    async fn add(&self, impression: &Impression) -> Result<()> {
        self.seen.insert(impression.identity_key(), Instant::now());
        Ok(())
    }

    async fn has_many(&self, impressions: &[Impression]) -> Result<Vec<bool>> {
        let now = Instant::now();
        Ok(impressions
            .iter()
            .map(|impression| self.contains(&impression.identity_key(), now))
            .collect())
    }

    async fn add_many(&self, impressions: &[Impression]) -> Result<()> {
        let now = Instant::now();
        for impression in impressions {
            self.seen.insert(impression.identity_key(), now);
        }
        Ok(())
    }
}
