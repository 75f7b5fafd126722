use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct GcRunLabels {
    pub outcome: GcRunOutcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum GcRunOutcome {
    Noop,
    Freed,
    Failed,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the image garbage collector.
pub struct Metrics {
    // -- detection --
    pub images_tracked: Gauge,
    pub detection_failures: Counter,

    // -- disk --
    pub disk_usage_percent: Gauge<f64, AtomicU64>,

    // -- eviction --
    pub gc_runs: Family<GcRunLabels, Counter>,
    pub images_evicted: Counter,
    pub bytes_freed: Counter,
    pub image_delete_failures: Counter,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let images_tracked: Gauge = Gauge::default();
        registry.register(
            "imagegc_images_tracked",
            "Number of images currently tracked by the collector",
            images_tracked.clone(),
        );

        let detection_failures = Counter::default();
        registry.register(
            "imagegc_detection_failures",
            "Image detection passes that failed to list runtime images",
            detection_failures.clone(),
        );

        let disk_usage_percent = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "imagegc_disk_usage_percent",
            "Usage of the image filesystem at the last collection pass",
            disk_usage_percent.clone(),
        );

        let gc_runs = Family::<GcRunLabels, Counter>::default();
        registry.register(
            "imagegc_gc_runs",
            "Garbage collection passes by outcome",
            gc_runs.clone(),
        );

        let images_evicted = Counter::default();
        registry.register(
            "imagegc_images_evicted",
            "Images removed by the collector",
            images_evicted.clone(),
        );

        let bytes_freed = Counter::default();
        registry.register(
            "imagegc_bytes_freed",
            "Bytes reclaimed by removing images",
            bytes_freed.clone(),
        );

        let image_delete_failures = Counter::default();
        registry.register(
            "imagegc_image_delete_failures",
            "Image removals rejected by the runtime",
            image_delete_failures.clone(),
        );

        Self {
            images_tracked,
            detection_failures,
            disk_usage_percent,
            gc_runs,
            images_evicted,
            bytes_freed,
            image_delete_failures,
        }
    }

    pub fn record_run(&self, outcome: GcRunOutcome) {
        self.gc_runs.get_or_create(&GcRunLabels { outcome }).inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all collector metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}
