//! Idempotency cache recording which impressions were already persisted.
//!
//! Entries expire after a configured TTL, so duplicate suppression only holds
//! within that window. Two backends are available:
//! - [`InMemoryRecentlySeenStore`]: process-local, one worker instance only
//! - [`RedisRecentlySeenStore`]: Valkey/Redis, shared across instances

mod in_memory;
mod redis_store;

pub use self::in_memory::InMemoryRecentlySeenStore;
pub use self::redis_store::RedisRecentlySeenStore;

use async_trait::async_trait;
use tracing::info;

use crate::config::{RecentlySeenMethod, RecentlySeenStoreConfig};
use crate::error::Result;
use crate::models::Impression;

/// Capability set of a recently-seen store.
///
/// Implementations must be idempotent: `add` on a present entry refreshes it,
/// `has` never mutates observable state.
#[async_trait]
pub trait RecentlySeenStore: Send + Sync {
    /// Whether the impression was marked within the TTL window
    async fn has(&self, impression: &Impression) -> Result<bool>;

    /// Mark the impression as seen now
    async fn add(&self, impression: &Impression) -> Result<()>;

    /// One flag per input, in input order
    async fn has_many(&self, impressions: &[Impression]) -> Result<Vec<bool>>;

    async fn add_many(&self, impressions: &[Impression]) -> Result<()>;
}

/// Store selected at startup from [`RecentlySeenStoreConfig`].
#[derive(Clone)]
pub enum RecentlySeenBackend {
    InMemory(InMemoryRecentlySeenStore),
    Redis(RedisRecentlySeenStore),
}

impl RecentlySeenBackend {
    /// Build the configured backend, connecting to Valkey if selected.
    pub async fn from_config(config: &RecentlySeenStoreConfig) -> Result<Self> {
        info!(
            method = config.method.name(),
            ttl_secs = config.ttl.as_secs(),
            "Initializing recently-seen store"
        );

        match &config.method {
            RecentlySeenMethod::InMemory => Ok(RecentlySeenBackend::InMemory(
                InMemoryRecentlySeenStore::new(config.ttl),
            )),
            RecentlySeenMethod::Valkey {
                host,
                port,
                namespace,
            } => {
                let url = format!("redis://{}:{}", host, port);
                let store =
                    RedisRecentlySeenStore::connect(&url, config.ttl.as_secs(), namespace.clone())
                        .await?;
                Ok(RecentlySeenBackend::Redis(store))
            }
        }
    }
}

#[async_trait]
impl RecentlySeenStore for RecentlySeenBackend {
    async fn has(&self, impression: &Impression) -> Result<bool> {
        match self {
            RecentlySeenBackend::InMemory(store) => store.has(impression).await,
            RecentlySeenBackend::Redis(store) => store.has(impression).await,
        }
    }

    async fn add(&self, impression: &Impression) -> Result<()> {
        match self {
            RecentlySeenBackend::InMemory(store) => store.add(impression).await,
            RecentlySeenBackend::Redis(store) => store.add(impression).await,
        }
    }

    async fn has_many(&self, impressions: &[Impression]) -> Result<Vec<bool>> {
        match self {
            RecentlySeenBackend::InMemory(store) => store.has_many(impressions).await,
            RecentlySeenBackend::Redis(store) => store.has_many(impressions).await,
        }
    }

    async fn add_many(&self, impressions: &[Impression]) -> Result<()> {
        match self {
            RecentlySeenBackend::InMemory(store) => store.add_many(impressions).await,
            RecentlySeenBackend::Redis(store) => store.add_many(impressions).await,
        }
    }
}
