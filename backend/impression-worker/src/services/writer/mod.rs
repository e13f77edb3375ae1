mod clickhouse_writer;

pub use self::clickhouse_writer::{ClickHouseImpressionWriter, ImpressionRow};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Impression;

/// Append-only sink for unique impressions.
///
/// Writing the same impression twice must be harmless: the dedup path relies
/// on the batch being replayed in full after a failure.
#[async_trait]
pub trait ImpressionWriter: Send + Sync {
    /// Persist all impressions as one batch, or fail without partial success
    /// being reported.
    async fn write_many(&self, impressions: &[Impression]) -> Result<()>;
}
