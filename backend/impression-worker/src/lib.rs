//! Impression Worker
//!
//! Consumes ad impression events from Kafka, drops redelivered duplicates
//! using a TTL-bounded recently-seen store, and appends the unique events to
//! ClickHouse.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;

// Public re-exports
pub use config::Config;
pub use error::{Result, WorkerError};
