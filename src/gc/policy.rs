use std::time::Duration;

use crate::error::GcError;

/// Band in which image garbage collection runs.
///
/// Usage at or above `high_threshold_percent` triggers a pass; a pass tries
/// to bring usage back down to `low_threshold_percent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGcPolicy {
    pub high_threshold_percent: i32,
    pub low_threshold_percent: i32,
    /// Images younger than this are never collected.
    pub min_age: Duration,
    /// Period of both the detection and the collection loop.
    pub gc_period: Duration,
}

impl ImageGcPolicy {
    /// Build a policy, rejecting thresholds outside `0 <= low <= high <= 100`.
    pub fn new(
        high_threshold_percent: i32,
        low_threshold_percent: i32,
        min_age: Duration,
        gc_period: Duration,
    ) -> Result<Self, GcError> {
        let policy = Self {
            high_threshold_percent,
            low_threshold_percent,
            min_age,
            gc_period,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), GcError> {
        if !(0..=100).contains(&self.high_threshold_percent) {
            return Err(GcError::InvalidPolicy(format!(
                "invalid high_threshold_percent {}, must be in range [0-100]",
                self.high_threshold_percent
            )));
        }
        if !(0..=100).contains(&self.low_threshold_percent) {
            return Err(GcError::InvalidPolicy(format!(
                "invalid low_threshold_percent {}, must be in range [0-100]",
                self.low_threshold_percent
            )));
        }
        if self.low_threshold_percent > self.high_threshold_percent {
            return Err(GcError::InvalidPolicy(format!(
                "low_threshold_percent {} can not be higher than high_threshold_percent {}",
                self.low_threshold_percent, self.high_threshold_percent
            )));
        }
        Ok(())
    }
}
