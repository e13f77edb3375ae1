use actix_web::{HttpResponse, Responder};
use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::error::{Result, WorkerError};

#[derive(Clone)]
pub struct WorkerMetrics {
    pub batches_committed: IntCounter,
    pub batches_rewound: IntCounter,
    pub records_dropped: IntCounter,
    pub impressions_written: IntCounter,
    pub duplicates_skipped: IntCounter,
}

impl WorkerMetrics {
    /// Counters registered in the process-wide default registry.
    pub fn new(service: &str) -> Result<Self> {
        Self::with_registry(service, prometheus::default_registry())
    }

    pub fn with_registry(service: &str, registry: &Registry) -> Result<Self> {
        let counter = |name: &str, help: &str| {
            IntCounter::with_opts(Opts::new(name, help).const_label("service", service.to_string()))
                .map_err(|e| WorkerError::Internal(format!("invalid metric {}: {}", name, e)))
        };

        let batches_committed = counter(
            "impression_batches_committed_total",
            "Total number of consumer batches processed and committed",
        )?;
        let batches_rewound = counter(
            "impression_batches_rewound_total",
            "Total number of consumer batches left uncommitted for redelivery",
        )?;
        let records_dropped = counter(
            "impression_records_dropped_total",
            "Total number of stream records dropped as malformed",
        )?;
        let impressions_written = counter(
            "impressions_written_total",
            "Total number of unique impressions written to the sink",
        )?;
        let duplicates_skipped = counter(
            "impression_duplicates_skipped_total",
            "Total number of duplicate impressions skipped",
        )?;

        for metric in [
            Box::new(batches_committed.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(batches_rewound.clone()),
            Box::new(records_dropped.clone()),
            Box::new(impressions_written.clone()),
            Box::new(duplicates_skipped.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register impression worker metric: {}", e);
            }
        }

        Ok(Self {
            batches_committed,
            batches_rewound,
            records_dropped,
            impressions_written,
            duplicates_skipped,
        })
    }
}

/// Encode every metric in `registry` in the Prometheus text format.
pub fn render(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| WorkerError::Internal(format!("failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| WorkerError::Internal(format!("metrics are not valid UTF-8: {}", e)))
}

/// `GET /metrics` over the default registry.
pub async fn metrics_handler() -> impl Responder {
    match render(prometheus::default_registry()) {
        Ok(body) => HttpResponse::Ok()
            .content_type(TextEncoder::new().format_type())
            .body(body),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}
