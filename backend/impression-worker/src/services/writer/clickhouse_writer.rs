use async_trait::async_trait;
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::ImpressionWriter;
use crate::config::ClickHouseWriterConfig;
use crate::error::{Result, WorkerError};
use crate::models::Impression;

/// Row struct for the impressions table
///
/// `ts` is stored as `DateTime64(3)`, which RowBinary encodes as epoch millis.
#[derive(Debug, Clone, PartialEq, Eq, Row, Serialize, Deserialize)]
pub struct ImpressionRow {
    pub id: String,
    pub ts: i64,
    pub user_id: String,
    pub ad_id: String,
}

impl From<&Impression> for ImpressionRow {
    fn from(impression: &Impression) -> Self {
        Self {
            id: impression.id.clone(),
            ts: impression.ts,
            user_id: impression.user_id.clone(),
            ad_id: impression.ad_id.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ClickHouseImpressionWriter {
    client: Client,
    table: String,
}

impl ClickHouseImpressionWriter {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    pub fn from_config(config: &ClickHouseWriterConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database)
            .with_user(&config.user)
            .with_password(&config.password);

        Self::new(client, config.table.clone())
    }

    /// Create the impressions table if it does not exist yet.
    ///
    /// Rows may repeat after a redelivered batch, so the table uses a plain
    /// MergeTree and readers have to tolerate duplicates.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.client
            .query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id String,
                    ts DateTime64(3),
                    user_id String,
                    ad_id String
                ) ENGINE = MergeTree()
                PARTITION BY toYYYYMM(ts)
                ORDER BY (ad_id, ts)
                "#,
                self.table
            ))
            .execute()
            .await
            .map_err(|e| {
                error!("Failed to create table {}: {}", self.table, e);
                WorkerError::ClickHouse(e.to_string())
            })?;

        info!(table = %self.table, "ClickHouse impressions table ready");
        Ok(())
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl ImpressionWriter for ClickHouseImpressionWriter {
    async fn write_many(&self, impressions: &[Impression]) -> Result<()> {
        if impressions.is_empty() {
            return Ok(());
        }

        let mut insert = self.client.insert::<ImpressionRow>(&self.table).map_err(|e| {
            error!("Failed to prepare insert into {}: {}", self.table, e);
            WorkerError::ClickHouse(e.to_string())
        })?;

        for impression in impressions {
            insert
                .write(&ImpressionRow::from(impression))
                .await
                .map_err(|e| {
                    error!("Failed to write impression row: {}", e);
                    WorkerError::ClickHouse(e.to_string())
                })?;
        }

        insert.end().await.map_err(|e| {
            error!("Failed to commit insert into {}: {}", self.table, e);
            WorkerError::ClickHouse(e.to_string())
        })?;

        debug!(
            table = %self.table,
            rows = impressions.len(),
            "Inserted impressions into ClickHouse"
        );
        Ok(())
    }
}
