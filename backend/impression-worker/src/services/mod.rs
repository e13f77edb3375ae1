pub mod command;
pub mod consumer;
pub mod recently_seen;
pub mod writer;

pub use command::{ImpressionCommandService, StoreOutcome};
pub use consumer::{BatchConsumer, BatchSource, KafkaBatchSource, RawRecord, RecordBatch};
pub use recently_seen::{
    InMemoryRecentlySeenStore, RecentlySeenBackend, RecentlySeenStore, RedisRecentlySeenStore,
};
pub use writer::{ClickHouseImpressionWriter, ImpressionWriter};
