//! Worker configuration loaded from environment variables.
//!
//! Required variables have no defaults; a missing or malformed value is a
//! startup failure and the process exits before connecting to anything.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, WorkerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Staging,
    Production,
}

impl FromStr for AppEnv {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" => Ok(AppEnv::Development),
            "staging" => Ok(AppEnv::Staging),
            "production" => Ok(AppEnv::Production),
            other => Err(WorkerError::Config(format!(
                "APP_ENV must be one of development, staging, production (got '{}')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: AppEnv,
    pub kafka: KafkaConsumerConfig,
    pub recently_seen: RecentlySeenStoreConfig,
    pub writer: ClickHouseWriterConfig,
    /// Port of the `/metrics` HTTP endpoint
    pub metrics_port: u16,
}

#[derive(Debug, Clone)]
pub struct KafkaConsumerConfig {
    pub brokers: Vec<String>,
    pub group_id: String,
    pub topic: String,
    /// `{KAFKA_CONSUMER_CLIENT_ID}:{APP_INSTANCE}`
    pub client_id: String,
    pub max_batch_size: usize,
    pub max_batch_wait: Duration,
}

impl KafkaConsumerConfig {
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

#[derive(Debug, Clone)]
pub struct RecentlySeenStoreConfig {
    pub ttl: Duration,
    pub method: RecentlySeenMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecentlySeenMethod {
    /// Process-local map, valid for a single worker instance only
    InMemory,
    /// Shared Valkey/Redis store
    Valkey {
        host: String,
        port: u16,
        namespace: String,
    },
}

impl RecentlySeenMethod {
    pub fn name(&self) -> &'static str {
        match self {
            RecentlySeenMethod::InMemory => "in-memory",
            RecentlySeenMethod::Valkey { .. } => "valkey",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClickHouseWriterConfig {
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub table: String,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from a fixed set of variables.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let app_env: AppEnv = env.parsed_or("APP_ENV", AppEnv::Development)?;

        let brokers: Vec<String> = env
            .required("KAFKA_CONSUMER_BROKERS")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if brokers.is_empty() {
            return Err(WorkerError::Config(
                "KAFKA_CONSUMER_BROKERS must list at least one broker".to_string(),
            ));
        }

        let client_id = format!(
            "{}:{}",
            env.optional("KAFKA_CONSUMER_CLIENT_ID")
                .unwrap_or_else(|| "impression-worker".to_string()),
            env.optional("APP_INSTANCE").unwrap_or_else(|| "0".to_string())
        );

        let max_batch_size: usize = env.parsed_or("KAFKA_CONSUMER_MAX_BATCH_SIZE", 500)?;
        if max_batch_size == 0 {
            return Err(WorkerError::Config(
                "KAFKA_CONSUMER_MAX_BATCH_SIZE must be a positive number".to_string(),
            ));
        }
        let max_batch_wait_ms: u64 = env.parsed_or("KAFKA_CONSUMER_MAX_BATCH_WAIT_MS", 1000)?;

        let kafka = KafkaConsumerConfig {
            brokers,
            group_id: env.required("KAFKA_CONSUMER_GROUP_ID")?,
            topic: env.required("KAFKA_CONSUMER_TOPIC")?,
            client_id,
            max_batch_size,
            max_batch_wait: Duration::from_millis(max_batch_wait_ms),
        };

        let ttl_seconds: u64 = env.parsed_required("RECENTLY_SEEN_STORE_TTL_SECONDS")?;
        if ttl_seconds == 0 {
            return Err(WorkerError::Config(
                "RECENTLY_SEEN_STORE_TTL_SECONDS must be a positive number".to_string(),
            ));
        }

        let method = match env.required("RECENTLY_SEEN_STORE_METHOD")?.as_str() {
            "in-memory" => RecentlySeenMethod::InMemory,
            "valkey" => {
                let port: u16 = env.parsed_or("RECENTLY_SEEN_STORE_VALKEY_PORT", 6379)?;
                if port == 0 {
                    return Err(WorkerError::Config(
                        "RECENTLY_SEEN_STORE_VALKEY_PORT must be a positive number".to_string(),
                    ));
                }
                RecentlySeenMethod::Valkey {
                    host: env.required("RECENTLY_SEEN_STORE_VALKEY_HOST")?,
                    port,
                    namespace: env
                        .optional("RECENTLY_SEEN_STORE_NAMESPACE")
                        .unwrap_or_else(|| "impression".to_string()),
                }
            }
            other => {
                return Err(WorkerError::Config(format!(
                    "RECENTLY_SEEN_STORE_METHOD must be 'in-memory' or 'valkey' (got '{}')",
                    other
                )))
            }
        };

        if method == RecentlySeenMethod::InMemory && app_env == AppEnv::Production {
            warn!("In-memory recently-seen store is process-local; duplicates across instances will not be detected");
        }

        let writer = ClickHouseWriterConfig {
            url: env.required("IMPRESSION_WRITER_CLICKHOUSE_URL")?,
            database: env.required("IMPRESSION_WRITER_CLICKHOUSE_DB")?,
            user: env.required("IMPRESSION_WRITER_CLICKHOUSE_USER")?,
            password: env.required("IMPRESSION_WRITER_CLICKHOUSE_PASS")?,
            table: env
                .optional("IMPRESSION_WRITER_CLICKHOUSE_TABLE")
                .unwrap_or_else(|| "impressions".to_string()),
        };

        let metrics_port: u16 = env.parsed_or("METRICS_PORT", 9090)?;

        Ok(Config {
            app_env,
            kafka,
            recently_seen: RecentlySeenStoreConfig {
                ttl: Duration::from_secs(ttl_seconds),
                method,
            },
            writer,
            metrics_port,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| WorkerError::Config(format!("{} is not set", key)))
    }

    fn parsed_required<T: FromStr>(&self, key: &str) -> Result<T> {
        let raw = self.required(key)?;
        parse_value(key, &raw)
    }

    fn parsed_or<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.optional(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| WorkerError::Config(format!("{} has an invalid value '{}'", key, raw)))
}
