//! Per-image bookkeeping shared by detection and eviction.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::runtime::ImageSummary;

/// What the collector knows about one cached image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRecord {
    /// When the image was first seen.  `None` means "before the manager
    /// started", which makes images found on the very first pass
    /// immediately old enough to collect.
    pub first_detected: Option<DateTime<Utc>>,
    /// Last time the image was seen in use.  `None` means never.
    pub last_used: Option<DateTime<Utc>>,
    pub size: u64,
}

/// Counts from one reconciliation, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub pruned: usize,
    pub tracked: usize,
}

/// Image ID to [`ImageRecord`] map behind a single async mutex.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Mutex<HashMap<String, ImageRecord>>,
}

impl RecordStore {
    pub async fn lock(&self) -> MutexGuard<'_, HashMap<String, ImageRecord>> {
        self.records.lock().await
    }

    /// Merge a fresh runtime listing into the store.
    ///
    /// New images get `first_detected = detect_time`; every listed image has
    /// its size refreshed, and `last_used = now` when it is in `in_use`.
    /// Records for images missing from `listed` are dropped.
    pub async fn reconcile(
        &self,
        listed: &[ImageSummary],
        in_use: &HashSet<String>,
        detect_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ReconcileSummary {
        let mut records = self.records.lock().await;
        let mut summary = ReconcileSummary::default();
        let mut current: HashSet<&str> = HashSet::with_capacity(listed.len());

        for image in listed {
            current.insert(image.id.as_str());

            let record = records.entry(image.id.clone()).or_insert_with(|| {
                debug!(image = %image.id, "new image detected");
                summary.added += 1;
                ImageRecord {
                    first_detected: detect_time,
                    last_used: None,
                    size: 0,
                }
            });

            if in_use.contains(&image.id) {
                record.last_used = Some(now);
            }
            record.size = image.size;
        }

        records.retain(|id, _| {
            let keep = current.contains(id.as_str());
            if !keep {
                debug!(image = %id, "image no longer present; dropping record");
                summary.pruned += 1;
            }
            keep
        });

        summary.tracked = records.len();
        summary
    }
}
