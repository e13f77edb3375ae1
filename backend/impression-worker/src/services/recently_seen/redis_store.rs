use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, error, info};

use super::RecentlySeenStore;
use crate::error::{Result, WorkerError};
use crate::models::Impression;

/// Recently-seen store backed by Valkey/Redis.
///
/// Each entry is a plain key `{namespace}:{identity_key}` holding `"1"` with
/// a native expiry, so several worker instances share one view of what was
/// persisted.
#[derive(Clone)]
pub struct RedisRecentlySeenStore {
    conn: ConnectionManager,
    ttl_seconds: u64,
    namespace: String,
}

impl RedisRecentlySeenStore {
    pub fn new(conn: ConnectionManager, ttl_seconds: u64, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            ttl_seconds,
            namespace: namespace.into(),
        }
    }

    /// Open a managed connection to `redis_url`.
    pub async fn connect(
        redis_url: &str,
        ttl_seconds: u64,
        namespace: impl Into<String>,
    ) -> Result<Self> {
        if ttl_seconds == 0 {
            return Err(WorkerError::Validation(
                "recently-seen TTL must be at least one second".to_string(),
            ));
        }

        let client = Client::open(redis_url).map_err(|e| {
            error!("Invalid Valkey URL {}: {}", redis_url, e);
            WorkerError::Redis(e)
        })?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Valkey at {}: {}", redis_url, e);
            WorkerError::Redis(e)
        })?;

        info!("Connected to Valkey recently-seen store at {}", redis_url);
        Ok(Self::new(conn, ttl_seconds, namespace))
    }

    fn key(&self, impression: &Impression) -> String {
        format!("{}:{}", self.namespace, impression.identity_key())
    }
}

#[async_trait]
impl RecentlySeenStore for RedisRecentlySeenStore {
    async fn has(&self, impression: &Impression) -> Result<bool> {
        let key = self.key(impression);
        let mut conn = self.conn.clone();

        let exists: bool = redis::cmd("EXISTS")
            .arg(&key)
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    async fn add(&self, impression: &Impression) -> Result<()> {
        let key = self.key(impression);
        let mut conn = self.conn.clone();

        redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn has_many(&self, impressions: &[Impression]) -> Result<Vec<bool>> {
        if impressions.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = impressions.iter().map(|i| self.key(i)).collect();
        let mut conn = self.conn.clone();

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        if values.len() != keys.len() {
            return Err(WorkerError::Internal(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }

        Ok(values.into_iter().map(|v| v.is_some()).collect())
    }

    async fn add_many(&self, impressions: &[Impression]) -> Result<()> {
        if impressions.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for impression in impressions {
            pipe.cmd("SET")
                .arg(self.key(impression))
                .arg("1")
                .arg("EX")
                .arg(self.ttl_seconds)
                .ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!(
            count = impressions.len(),
            ttl_secs = self.ttl_seconds,
            "Marked impressions as recently seen"
        );
        Ok(())
    }
}
