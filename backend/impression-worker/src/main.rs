//! Impression Worker - Kafka consumer deduplicating ad impressions into ClickHouse
//!
//! Environment variables:
//! - KAFKA_CONSUMER_BROKERS / KAFKA_CONSUMER_GROUP_ID / KAFKA_CONSUMER_TOPIC: required
//! - KAFKA_CONSUMER_CLIENT_ID: client id prefix (default: "impression-worker")
//! - APP_INSTANCE: instance suffix for the client id (default: "0")
//! - RECENTLY_SEEN_STORE_TTL_SECONDS: dedup window in seconds
//! - RECENTLY_SEEN_STORE_METHOD: "in-memory" or "valkey"
//! - RECENTLY_SEEN_STORE_VALKEY_HOST / RECENTLY_SEEN_STORE_VALKEY_PORT: Valkey address
//! - IMPRESSION_WRITER_CLICKHOUSE_URL / _DB / _USER / _PASS: ClickHouse connection
//! - METRICS_PORT: port of the Prometheus `/metrics` endpoint (default: 9090)

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use impression_worker::metrics::{metrics_handler, WorkerMetrics};
use impression_worker::services::{
    BatchConsumer, ClickHouseImpressionWriter, ImpressionCommandService, KafkaBatchSource,
    RecentlySeenBackend,
};
use impression_worker::Config;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,impression_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting impression-worker");

    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        app_env = ?config.app_env,
        kafka_topic = %config.kafka.topic,
        recently_seen = config.recently_seen.method.name(),
        clickhouse_table = %config.writer.table,
        "Configuration loaded"
    );

    let writer = ClickHouseImpressionWriter::from_config(&config.writer);
    writer
        .ensure_schema()
        .await
        .context("Failed to prepare ClickHouse impressions table")?;
    let recently_seen = RecentlySeenBackend::from_config(&config.recently_seen)
        .await
        .context("Failed to initialize recently-seen store")?;
    let service = ImpressionCommandService::new(recently_seen, writer);

    let metrics =
        WorkerMetrics::new("impression-worker").context("Failed to create worker metrics")?;

    info!("Starting metrics endpoint on 0.0.0.0:{}", config.metrics_port);
    let metrics_server =
        HttpServer::new(|| App::new().route("/metrics", web::get().to(metrics_handler)))
            .workers(1)
            .disable_signals()
            .bind(("0.0.0.0", config.metrics_port))
            .context("Failed to bind metrics endpoint")?
            .run();
    let metrics_server_handle = metrics_server.handle();
    actix_web::rt::spawn(async move {
        if let Err(e) = metrics_server.await {
            error!("Metrics endpoint error: {}", e);
        }
    });

    let source = KafkaBatchSource::new(&config.kafka).context("Failed to create Kafka consumer")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut consumer = BatchConsumer::new(source, service, metrics, shutdown_rx);
    let result = consumer.run().await;
    metrics_server_handle.stop(true).await;
    result.context("Impression consumer failed")?;

    info!("impression-worker stopped");
    Ok(())
}
