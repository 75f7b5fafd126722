//! Image garbage collection manager.
//!
//! Tracks every image the container runtime holds and, when the image
//! filesystem crosses the policy's high threshold, removes the least recently
//! used images that are neither in use nor younger than the minimum age until
//! usage is back at the low threshold.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::eviction;
use super::policy::ImageGcPolicy;
use super::records::RecordStore;
use crate::error::GcError;
use crate::metrics::{GcRunOutcome, MetricsRegistry};
use crate::runtime::{FsStats, ImageNotFound, ImageRuntime};

/// Storage root used when the runtime cannot report its own.
pub const DEFAULT_ROOT_DIR: &str = "/var/lib/docker";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Result of a successful collection pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GcOutcome {
    /// Usage was under the high threshold (or already at the low one).
    Skipped { usage_percent: f64 },
    /// The eviction walk met its budget.
    Freed(FreeSpaceReport),
}

/// Totals of one eviction walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeSpaceReport {
    pub bytes_to_free: u64,
    pub freed: u64,
    pub evicted: usize,
}

// ---------------------------------------------------------------------------
// ImageGcManager
// ---------------------------------------------------------------------------

pub struct ImageGcManager {
    pub(super) runtime: Arc<dyn ImageRuntime>,
    pub(super) policy: ImageGcPolicy,
    pub(super) records: RecordStore,
    /// Caller-supplied references that must be treated as in use.
    service_images: Mutex<Vec<String>>,
    /// Infrastructure image that is always in use.
    sandbox_image: String,
    default_root_dir: PathBuf,
    /// Set after the first successful detection; only affects log levels.
    pub(super) initialized: AtomicBool,
    pub(super) metrics: MetricsRegistry,
}

impl ImageGcManager {
    pub fn new(
        runtime: Arc<dyn ImageRuntime>,
        policy: ImageGcPolicy,
        sandbox_image: impl Into<String>,
        metrics: MetricsRegistry,
    ) -> Result<Self, GcError> {
        policy.validate()?;
        Ok(Self {
            runtime,
            policy,
            records: RecordStore::default(),
            service_images: Mutex::new(Vec::new()),
            sandbox_image: sandbox_image.into(),
            default_root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            initialized: AtomicBool::new(false),
            metrics,
        })
    }

    /// Override the storage root probed when the runtime cannot report one.
    pub fn with_default_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_root_dir = dir.into();
        self
    }

    pub fn policy(&self) -> &ImageGcPolicy {
        &self.policy
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    pub fn runtime(&self) -> &Arc<dyn ImageRuntime> {
        &self.runtime
    }

    /// Replace the set of image references that must never be collected.
    pub fn set_service_images(&self, images: Vec<String>) {
        info!(images = %images.join(","), "set service images");
        *self
            .service_images
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = images;
    }

    fn service_images(&self) -> Vec<String> {
        self.service_images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // -----------------------------------------------------------------------
    // Detection
    // -----------------------------------------------------------------------

    /// Refresh the record store from the runtime and return the IDs of the
    /// images currently in use.
    ///
    /// `detect_time` becomes `first_detected` for images seen for the first
    /// time; `None` marks them as pre-existing.  A listing failure leaves the
    /// store untouched.
    pub async fn detect_images(
        &self,
        detect_time: Option<DateTime<Utc>>,
    ) -> Result<HashSet<String>, GcError> {
        let in_use = self.resolve_in_use().await;

        let images = match self.runtime.list_images().await {
            Ok(images) => images,
            Err(e) => {
                self.metrics.metrics.detection_failures.inc();
                return Err(GcError::ListImages(e));
            }
        };

        let summary = self
            .records
            .reconcile(&images, &in_use, detect_time, Utc::now())
            .await;

        self.metrics
            .metrics
            .images_tracked
            .set(i64::try_from(summary.tracked).unwrap_or(i64::MAX));
        info!(
            listed = images.len(),
            new = summary.added,
            pruned = summary.pruned,
            in_use = in_use.len(),
            "image detection complete"
        );
        Ok(in_use)
    }

    /// Resolve the service images plus the sandbox image to runtime IDs.
    /// References that fail to resolve are left out of this pass.
    async fn resolve_in_use(&self) -> HashSet<String> {
        let mut references = self.service_images();
        references.push(self.sandbox_image.clone());

        let mut in_use = HashSet::with_capacity(references.len());
        for reference in references.iter().filter(|r| !r.is_empty()) {
            match self.runtime.inspect_image(reference).await {
                Ok(id) if !id.is_empty() => {
                    in_use.insert(id);
                }
                Ok(_) => {}
                Err(e) if e.is::<ImageNotFound>() => {
                    debug!(image = %reference, "in-use image not present on node");
                }
                Err(e) => {
                    warn!(
                        image = %reference,
                        error = %format!("{e:#}"),
                        "failed to resolve in-use image; excluding it from this pass"
                    );
                }
            }
        }
        in_use
    }

    // -----------------------------------------------------------------------
    // Collection
    // -----------------------------------------------------------------------

    /// Run one collection pass.
    ///
    /// Does nothing while usage is under the high threshold; otherwise frees
    /// enough bytes to land at the low threshold.
    pub async fn garbage_collect(&self) -> Result<GcOutcome, GcError> {
        let result = self.collect().await;
        let outcome = match &result {
            Ok(GcOutcome::Skipped { .. }) => GcRunOutcome::Noop,
            Ok(GcOutcome::Freed(_)) => GcRunOutcome::Freed,
            Err(_) => GcRunOutcome::Failed,
        };
        self.metrics.metrics.record_run(outcome);
        result
    }

    async fn collect(&self) -> Result<GcOutcome, GcError> {
        let stats = self.probe_image_fs().await?;

        let capacity = stats.capacity_bytes;
        let mut available = stats.available_bytes;
        if available > capacity {
            warn!(available, capacity, "available bytes exceed capacity; clamping");
            available = capacity;
        }
        if capacity == 0 {
            return Err(GcError::ZeroCapacity);
        }

        let usage_percent = FsStats {
            capacity_bytes: capacity,
            available_bytes: available,
        }
        .used_percent();
        self.metrics.metrics.disk_usage_percent.set(usage_percent);

        let high = self.policy.high_threshold_percent;
        let low = self.policy.low_threshold_percent;
        info!(
            available,
            capacity,
            usage_percent = %format_args!("{usage_percent:.0}"),
            high_threshold = high,
            "image filesystem usage"
        );
        if usage_percent < f64::from(high) {
            return Ok(GcOutcome::Skipped { usage_percent });
        }

        let bytes_to_free = eviction::bytes_to_free(capacity, available, low);
        if bytes_to_free == 0 {
            return Ok(GcOutcome::Skipped { usage_percent });
        }

        info!(
            usage_percent = %format_args!("{usage_percent:.0}"),
            high_threshold = high,
            low_threshold = low,
            bytes_to_free,
            "image filesystem over high threshold; freeing space"
        );
        let report = self.free_space(bytes_to_free, Utc::now()).await?;
        Ok(GcOutcome::Freed(report))
    }

    /// Probe the runtime's storage root, falling back to the default root
    /// when the root cannot be resolved or probed.
    pub(crate) async fn probe_image_fs(&self) -> Result<FsStats, GcError> {
        let root = match self.runtime.root_dir().await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(
                    error = %format!("{e:#}"),
                    fallback = %self.default_root_dir.display(),
                    "failed to get runtime root dir; using default"
                );
                self.default_root_dir.clone()
            }
        };
        debug!(root_dir = %root.display(), "probing image filesystem");

        match self.runtime.fs_stats(&root).await {
            Ok(stats) => Ok(stats),
            Err(e) => {
                warn!(
                    root_dir = %root.display(),
                    error = %format!("{e:#}"),
                    "failed to probe image filesystem; retrying on default root"
                );
                self.probe_default_root().await
            }
        }
    }

    async fn probe_default_root(&self) -> Result<FsStats, GcError> {
        let path: &Path = &self.default_root_dir;
        self.runtime
            .fs_stats(path)
            .await
            .map_err(|source| GcError::DiskProbe {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Remove unused images, coldest first, until `bytes_to_free` bytes
    /// have been reclaimed.
    ///
    /// The last image removed may overshoot the budget.  When candidates run
    /// out first the pass fails with [`GcError::Shortfall`], which still
    /// reports the bytes that were freed.
    pub async fn free_space(
        &self,
        bytes_to_free: u64,
        free_time: DateTime<Utc>,
    ) -> Result<FreeSpaceReport, GcError> {
        let in_use = self.detect_images(Some(free_time)).await?;

        let mut records = self.records.lock().await;
        let candidates = eviction::candidates(&records, &in_use);

        let mut report = FreeSpaceReport {
            bytes_to_free,
            ..FreeSpaceReport::default()
        };
        let mut failures = Vec::new();

        for candidate in candidates {
            let id = candidate.id.as_str();
            let record = &candidate.record;

            if eviction::used_since(record, free_time) {
                debug!(image = %id, "image used since pass started; not eligible");
                continue;
            }
            if !eviction::old_enough(record, free_time, self.policy.min_age) {
                debug!(
                    image = %id,
                    min_age_secs = self.policy.min_age.as_secs(),
                    "image younger than minimum age; not eligible"
                );
                continue;
            }

            debug!(image = %id, size = record.size, "removing image");
            if let Err(e) = self.runtime.remove_image(id).await {
                let message = format!("{e:#}");
                warn!(image = %id, error = %message, "failed to remove image");
                self.metrics.metrics.image_delete_failures.inc();
                failures.push(format!("{id}: {message}"));
                continue;
            }

            records.remove(id);
            report.freed += record.size;
            report.evicted += 1;
            self.metrics.metrics.images_evicted.inc();
            self.metrics.metrics.bytes_freed.inc_by(record.size);
            info!(image = %id, size = record.size, "removed image");

            if report.freed >= bytes_to_free {
                break;
            }
        }
        self.metrics
            .metrics
            .images_tracked
            .set(i64::try_from(records.len()).unwrap_or(i64::MAX));
        drop(records);

        info!(
            freed_bytes = report.freed,
            wanted_bytes = bytes_to_free,
            evicted = report.evicted,
            failed = failures.len(),
            "image eviction pass finished"
        );

        if report.freed < bytes_to_free {
            return Err(GcError::Shortfall {
                wanted: bytes_to_free,
                freed: report.freed,
                failures,
            });
        }
        Ok(report)
    }
}
