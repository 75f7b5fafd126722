//! Eviction order, eligibility rules and the byte budget.
//!
//! The protection rules are independent predicates so that the walk in
//! [`ImageGcManager::free_space`](super::manager::ImageGcManager::free_space)
//! only composes them:
//!
//! * [`is_in_use`] removes an image from the candidate list entirely;
//! * [`used_since`] skips candidates that became in use after the scan;
//! * [`old_enough`] skips images younger than the policy's minimum age.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::records::ImageRecord;

/// An image considered for deletion in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub id: String,
    pub record: ImageRecord,
}

/// Least-recently-used first; never-used images before any used one; ties
/// broken by older detection, then by ID so the order is total.
fn eviction_order(a: &EvictionCandidate, b: &EvictionCandidate) -> Ordering {
    a.record
        .last_used
        .cmp(&b.record.last_used)
        .then_with(|| a.record.first_detected.cmp(&b.record.first_detected))
        .then_with(|| a.id.cmp(&b.id))
}

/// Every record not in `in_use`, sorted in eviction order.
pub fn candidates(
    records: &HashMap<String, ImageRecord>,
    in_use: &HashSet<String>,
) -> Vec<EvictionCandidate> {
    let mut candidates: Vec<EvictionCandidate> = records
        .iter()
        .filter(|(id, _)| !is_in_use(id, in_use))
        .map(|(id, record)| EvictionCandidate {
            id: id.clone(),
            record: *record,
        })
        .collect();
    candidates.sort_by(eviction_order);
    candidates
}

pub fn is_in_use(id: &str, in_use: &HashSet<String>) -> bool {
    in_use.contains(id)
}

/// Whether the image was marked used at or after `free_time`.
pub fn used_since(record: &ImageRecord, free_time: DateTime<Utc>) -> bool {
    record.last_used.is_some_and(|t| t >= free_time)
}

/// Whether the image has been known for at least `min_age` at `free_time`.
///
/// Images detected before the manager started (`first_detected == None`)
/// are always old enough.
pub fn old_enough(record: &ImageRecord, free_time: DateTime<Utc>, min_age: Duration) -> bool {
    match record.first_detected {
        None => true,
        Some(detected) => free_time
            .signed_duration_since(detected)
            .to_std()
            .is_ok_and(|age| age >= min_age),
    }
}

/// Bytes to delete so that usage lands at `low_threshold_percent`.
///
/// `capacity * (100 - low) / 100 - available`, or `0` when the result would
/// be negative.
pub fn bytes_to_free(capacity: u64, available: u64, low_threshold_percent: i32) -> u64 {
    let target = i128::from(capacity) * i128::from(100 - low_threshold_percent) / 100;
    u64::try_from(target - i128::from(available)).unwrap_or(0)
}
