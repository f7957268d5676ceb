/*!
Observability infrastructure for the persistence framework.

- Structured logging through `tracing`, installed with [`init_observability`]
- Prometheus instrumentation of persistence operations (`metrics` feature)
*/

#[cfg(feature = "metrics")]
use once_cell::sync::OnceCell;
#[cfg(feature = "metrics")]
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{PersistError, Result};

/// Filter directive applied on top of `RUST_LOG`
pub const DEFAULT_DIRECTIVE: &str = "persist_framework=info";

#[cfg(feature = "metrics")]
static METRICS: OnceCell<PersistMetrics> = OnceCell::new();

/// Metrics collection for persistence operations
///
/// Every series is labelled with the operation (`persist`, `retrieve`,
/// `update`) and the type tag of the objects involved.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct PersistMetrics {
    pub operations_total: IntCounterVec,
    pub errors_total: IntCounterVec,
    pub latency_seconds: HistogramVec,
    pub batch_objects: HistogramVec,

    registry: Registry,
}

#[cfg(feature = "metrics")]
impl PersistMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new(
                "persist_operations_total",
                "Persistence operations started",
            ),
            &["operation", "type_tag"],
        )
        .map_err(|e| metric_error("operations_total", e))?;

        let errors_total = IntCounterVec::new(
            Opts::new("persist_errors_total", "Persistence operations that failed"),
            &["operation", "type_tag", "kind"],
        )
        .map_err(|e| metric_error("errors_total", e))?;

        let latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "persist_latency_seconds",
                "Duration of persistence operations in seconds",
            ),
            &["operation", "type_tag"],
        )
        .map_err(|e| metric_error("latency_seconds", e))?;

        let batch_objects = HistogramVec::new(
            HistogramOpts::new(
                "persist_batch_objects",
                "Objects written or read by one operation",
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 1000.0]),
            &["operation", "type_tag"],
        )
        .map_err(|e| metric_error("batch_objects", e))?;

        registry
            .register(Box::new(operations_total.clone()))
            .map_err(|e| metric_error("operations_total", e))?;
        registry
            .register(Box::new(errors_total.clone()))
            .map_err(|e| metric_error("errors_total", e))?;
        registry
            .register(Box::new(latency_seconds.clone()))
            .map_err(|e| metric_error("latency_seconds", e))?;
        registry
            .register(Box::new(batch_objects.clone()))
            .map_err(|e| metric_error("batch_objects", e))?;

        Ok(Self {
            operations_total,
            errors_total,
            latency_seconds,
            batch_objects,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> Result<&'static PersistMetrics> {
        METRICS.get_or_try_init(Self::new)
    }

    pub fn record_operation(&self, operation: &str, type_tag: &str) {
        self.operations_total
            .with_label_values(&[operation, type_tag])
            .inc();
    }

    pub fn record_error(&self, operation: &str, type_tag: &str, err: &PersistError) {
        self.errors_total
            .with_label_values(&[operation, type_tag, err.kind()])
            .inc();
    }

    pub fn record_latency(&self, operation: &str, type_tag: &str, duration: std::time::Duration) {
        self.latency_seconds
            .with_label_values(&[operation, type_tag])
            .observe(duration.as_secs_f64());
    }

    pub fn record_batch(&self, operation: &str, type_tag: &str, objects: usize) {
        self.batch_objects
            .with_label_values(&[operation, type_tag])
            .observe(objects as f64);
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| PersistError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| PersistError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

#[cfg(feature = "metrics")]
fn metric_error(name: &str, err: prometheus::Error) -> PersistError {
    PersistError::configuration(format!("Failed to set up metric {name}: {err}"))
}

/// Gather the global metrics in Prometheus text format
#[cfg(feature = "metrics")]
pub fn gather_metrics() -> Result<String> {
    PersistMetrics::global()?.gather_metrics()
}

/// Times one persistence operation and records its outcome
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct OperationTimer {
    start: Instant,
    operation: &'static str,
    type_tag: String,
}

#[cfg(feature = "metrics")]
impl OperationTimer {
    /// Start timing, counting the operation as started
    pub fn start(operation: &'static str, type_tag: &str) -> Self {
        if let Ok(metrics) = PersistMetrics::global() {
            metrics.record_operation(operation, type_tag);
        }
        Self {
            start: Instant::now(),
            operation,
            type_tag: type_tag.to_string(),
        }
    }

    /// Record latency, plus the error kind when `result` failed
    pub fn finish<T>(self, result: &Result<T>, objects: usize) {
        let Ok(metrics) = PersistMetrics::global() else {
            return;
        };
        metrics.record_latency(self.operation, &self.type_tag, self.start.elapsed());
        match result {
            Ok(_) => metrics.record_batch(self.operation, &self.type_tag, objects),
            Err(err) => metrics.record_error(self.operation, &self.type_tag, err),
        }
    }
}

/// Initialize the global tracing subscriber
///
/// Log levels come from `RUST_LOG`, with [`DEFAULT_DIRECTIVE`] added on top.
///
/// # Arguments
/// * `json` - Emit JSON lines instead of human-readable output
///
/// # Errors
/// * `PersistError::Configuration` - If a subscriber is already installed
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    PersistMetrics::global()?;

    let directive = DEFAULT_DIRECTIVE
        .parse::<Directive>()
        .map_err(|e| PersistError::configuration(format!("Invalid log directive: {e}")))?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };
    result.map_err(|e| {
        PersistError::configuration(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!(json, "Persistence observability initialized");
    Ok(())
}

/// Initialize observability with JSON output
pub fn init_default_observability() -> Result<()> {
    init_observability(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let _ = init_default_observability();
        assert!(matches!(
            init_observability(false),
            Err(PersistError::Configuration(_))
        ));
    }
}

#[cfg(all(test, feature = "metrics"))]
mod metrics_tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = PersistMetrics::global().unwrap();
        metrics.record_operation("persist", "PropertySet");
        metrics.record_error("retrieve", "PropertySet", &PersistError::not_found("gone"));
        metrics.record_latency("persist", "PropertySet", std::time::Duration::from_millis(3));
        metrics.record_batch("persist", "PropertySet", 3);
    }

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::start("update", "PropertySet");
        timer.finish(&Ok(()), 1);

        let timer = OperationTimer::start("update", "PropertySet");
        let failed: Result<()> = Err(PersistError::logic("bad call"));
        timer.finish(&failed, 0);

        let text = gather_metrics().unwrap();
        assert!(text.contains("persist_operations_total"));
        assert!(text.contains("kind=\"logic\""));
    }
}
