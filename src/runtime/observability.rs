//! Structured logging setup and in-process counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log format options for structured logging
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON output for log aggregators
    Json,
    /// Human-readable format for development (with all fields)
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

/// Logging configuration.
///
/// # Example
///
/// ```rust,no_run
/// # use durotopic::runtime::{ObservabilityConfig, LogFormat};
/// let config = ObservabilityConfig {
///     log_format: LogFormat::Json,
///     log_level: "debug".to_string(),
///     ..Default::default()
/// };
/// durotopic::runtime::init_logging(&config).ok();
/// ```
///
/// # Correlation Fields
///
/// Topic logs carry `topic_id` and, where relevant, `api`, `failures`,
/// `count` and `total`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Mirror the topic counters into OpenTelemetry instruments. Needs the
    /// `observability` feature; ignored otherwise.
    pub metrics_enabled: bool,
    /// OTLP/gRPC endpoint for metrics export (e.g., "http://localhost:4317").
    /// Without one, instruments are read through a manual reader only.
    pub metrics_export_endpoint: Option<String>,
    pub metrics_export_interval_ms: u64,

    pub log_format: LogFormat,
    /// Level for `durotopic` targets (e.g., "info", "debug"). `RUST_LOG` wins when set.
    pub log_level: String,
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_export_endpoint: None,
            metrics_export_interval_ms: 60_000,
            log_format: LogFormat::Compact,
            log_level: "info".to_string(),
            service_name: "durotopic".to_string(),
        }
    }
}

fn default_filter_expression(level: &str) -> String {
    format!("warn,durotopic={level}")
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter_expression(&config.log_level)));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| format!("Failed to initialize JSON logging: {e}"))?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| format!("Failed to initialize pretty logging: {e}"))?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .map_err(|e| format!("Failed to initialize compact logging: {e}"))?,
    }

    tracing::debug!(target: "durotopic::runtime", service_name = %config.service_name, "Logging initialized");
    Ok(())
}

/// Snapshot of the topic counters for tests and diagnostics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub activations: u64,
    pub deactivations: u64,
    pub queries_succeeded: u64,
    pub queries_unavailable: u64,
    pub queries_failed: u64,
    pub retries_started: u64,
    pub apis_recovered: u64,
    pub apis_disabled: u64,
    pub persistence_failures: u64,
    pub trigger_failures: u64,
}

/// Counters shared by every topic of a runtime.
///
/// Always kept as atomics for [`MetricsSnapshot`]. With the `observability`
/// feature and `metrics_enabled`, every increment is also added to an
/// OpenTelemetry counter named `durotopic.<counter>`.
#[derive(Debug, Default)]
pub struct TopicMetrics {
    activations: AtomicU64,
    deactivations: AtomicU64,
    queries_succeeded: AtomicU64,
    queries_unavailable: AtomicU64,
    queries_failed: AtomicU64,
    retries_started: AtomicU64,
    apis_recovered: AtomicU64,
    apis_disabled: AtomicU64,
    persistence_failures: AtomicU64,
    trigger_failures: AtomicU64,
    #[cfg(feature = "observability")]
    otel: Option<otel::OtelCounters>,
}

impl TopicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the counters described by `config`.
    ///
    /// # Errors
    ///
    /// Fails if the OTLP exporter cannot be created.
    pub fn from_config(config: &ObservabilityConfig) -> Result<Self, String> {
        #[cfg(feature = "observability")]
        if config.metrics_enabled {
            return Ok(Self {
                otel: Some(otel::OtelCounters::new(config)?),
                ..Self::default()
            });
        }
        #[cfg(not(feature = "observability"))]
        if config.metrics_enabled {
            tracing::warn!(
                target: "durotopic::runtime",
                "metrics_enabled is set but durotopic was built without the observability feature"
            );
        }
        Ok(Self::default())
    }

    /// True when increments are mirrored into OpenTelemetry.
    pub fn exporting(&self) -> bool {
        #[cfg(feature = "observability")]
        {
            self.otel.is_some()
        }
        #[cfg(not(feature = "observability"))]
        {
            false
        }
    }

    /// Flush and stop the OpenTelemetry meter provider, if any.
    pub fn shutdown_exporter(&self) {
        #[cfg(feature = "observability")]
        if let Some(otel) = &self.otel {
            otel.shutdown();
        }
    }

    fn bump(&self, counter: &AtomicU64, _name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        if let Some(otel) = &self.otel {
            otel.add(_name);
        }
    }

    pub fn record_activation(&self) {
        self.bump(&self.activations, "activations");
    }

    pub fn record_deactivation(&self) {
        self.bump(&self.deactivations, "deactivations");
    }

    pub fn record_query_succeeded(&self) {
        self.bump(&self.queries_succeeded, "queries_succeeded");
    }

    pub fn record_query_unavailable(&self) {
        self.bump(&self.queries_unavailable, "queries_unavailable");
    }

    pub fn record_query_failed(&self) {
        self.bump(&self.queries_failed, "queries_failed");
    }

    pub fn record_retry_started(&self) {
        self.bump(&self.retries_started, "retries_started");
    }

    pub fn record_api_recovered(&self) {
        self.bump(&self.apis_recovered, "apis_recovered");
    }

    pub fn record_api_disabled(&self) {
        self.bump(&self.apis_disabled, "apis_disabled");
    }

    pub fn record_persistence_failure(&self) {
        self.bump(&self.persistence_failures, "persistence_failures");
    }

    pub fn record_trigger_failure(&self) {
        self.bump(&self.trigger_failures, "trigger_failures");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            activations: self.activations.load(Ordering::Relaxed),
            deactivations: self.deactivations.load(Ordering::Relaxed),
            queries_succeeded: self.queries_succeeded.load(Ordering::Relaxed),
            queries_unavailable: self.queries_unavailable.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            retries_started: self.retries_started.load(Ordering::Relaxed),
            apis_recovered: self.apis_recovered.load(Ordering::Relaxed),
            apis_disabled: self.apis_disabled.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            trigger_failures: self.trigger_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(feature = "observability")]
mod otel {
    use std::collections::HashMap;
    use std::fmt;
    use std::time::Duration;

    use opentelemetry::KeyValue;
    use opentelemetry::metrics::{Counter, MeterProvider as _};
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::metrics::{ManualReader, PeriodicReader, SdkMeterProvider};

    use super::ObservabilityConfig;

    const COUNTERS: [&str; 10] = [
        "activations",
        "deactivations",
        "queries_succeeded",
        "queries_unavailable",
        "queries_failed",
        "retries_started",
        "apis_recovered",
        "apis_disabled",
        "persistence_failures",
        "trigger_failures",
    ];

    pub(super) struct OtelCounters {
        meter_provider: SdkMeterProvider,
        counters: HashMap<&'static str, Counter<u64>>,
    }

    impl fmt::Debug for OtelCounters {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("OtelCounters")
                .field("counters", &self.counters.len())
                .finish_non_exhaustive()
        }
    }

    impl OtelCounters {
        pub(super) fn new(config: &ObservabilityConfig) -> Result<Self, String> {
            let resource = Resource::new(vec![KeyValue::new("service.name", config.service_name.clone())]);

            let meter_provider = if let Some(ref endpoint) = config.metrics_export_endpoint {
                let exporter = opentelemetry_otlp::MetricExporter::builder()
                    .with_tonic()
                    .with_endpoint(endpoint)
                    .build()
                    .map_err(|e| format!("Failed to create metrics exporter: {e}"))?;
                let reader = PeriodicReader::builder(exporter, opentelemetry_sdk::runtime::Tokio)
                    .with_interval(Duration::from_millis(config.metrics_export_interval_ms))
                    .build();
                SdkMeterProvider::builder()
                    .with_reader(reader)
                    .with_resource(resource)
                    .build()
            } else {
                SdkMeterProvider::builder()
                    .with_reader(ManualReader::builder().build())
                    .with_resource(resource)
                    .build()
            };

            let meter = meter_provider.meter("durotopic");
            let counters = COUNTERS
                .iter()
                .map(|name| (*name, meter.u64_counter(format!("durotopic.{name}")).build()))
                .collect();
            Ok(Self {
                meter_provider,
                counters,
            })
        }

        pub(super) fn add(&self, name: &'static str) {
            if let Some(counter) = self.counters.get(name) {
                counter.add(1, &[]);
            }
        }

        pub(super) fn shutdown(&self) {
            if let Err(e) = self.meter_provider.shutdown() {
                tracing::warn!(target: "durotopic::runtime", error = %e, "Failed to shutdown metrics provider");
            }
        }
    }
}
