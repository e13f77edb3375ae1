use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkerError>;

/// Errors surfaced by the impression pipeline.
///
/// Every variant here aborts the batch being processed so that the stream
/// redelivers it; [`WorkerError::Rewind`] additionally stops the consumer. Record-level parse failures use [`RecordError`] instead and
/// never reach this type.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Kafka error: {0}")]
    Kafka(String),

    #[error("ClickHouse error: {0}")]
    ClickHouse(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A failed batch could not be scheduled for redelivery. Continuing
    /// would let a later commit move past it, so this stops the consumer.
    #[error("Rewind error: {0}")]
    Rewind(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rdkafka::error::KafkaError> for WorkerError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        WorkerError::Kafka(err.to_string())
    }
}

impl From<clickhouse::error::Error> for WorkerError {
    fn from(err: clickhouse::error::Error) -> Self {
        WorkerError::ClickHouse(err.to_string())
    }
}

/// Reasons a single stream record is dropped before reaching the dedup core.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("null message")]
    EmptyPayload,

    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("invalid json: {0}")]
    InvalidJson(serde_json::Error),

    #[error("schema violation: {0}")]
    Schema(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkerError::Config("KAFKA_CONSUMER_TOPIC is not set".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: KAFKA_CONSUMER_TOPIC is not set"
        );

        assert_eq!(RecordError::EmptyPayload.to_string(), "null message");
    }
}
