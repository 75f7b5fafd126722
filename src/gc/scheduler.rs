//! Detection and collection loops.
//!
//! Both loops run their body immediately and then once per `gc_period` until
//! the shutdown channel flips.  Failures are logged and retried on the next
//! tick; neither loop ever exits on error.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Level};

use super::manager::ImageGcManager;
use crate::error::error_chain;

impl ImageGcManager {
    /// Spawn the detection and collection loops.
    ///
    /// Call this once per manager; every call spawns another pair of loops.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            period_secs = self.policy.gc_period.as_secs_f64(),
            high_threshold = self.policy.high_threshold_percent,
            low_threshold = self.policy.low_threshold_percent,
            min_age_secs = self.policy.min_age.as_secs(),
            "starting image gc manager"
        );

        let detection = tokio::spawn(run_detection_loop(Arc::clone(self), shutdown.clone()));
        let collection = tokio::spawn(run_gc_loop(Arc::clone(self), shutdown));
        vec![detection, collection]
    }

    /// One detection tick.
    ///
    /// Until a pass succeeds, new images are recorded with an unknown
    /// detection time so that images already on the node are immediately
    /// eligible for collection.
    pub(crate) async fn detection_tick(&self) {
        let initialized = self.initialized.load(Ordering::Relaxed);
        let detect_time = initialized.then(Utc::now);

        match self.detect_images(detect_time).await {
            Ok(_) => self.initialized.store(true, Ordering::Relaxed),
            Err(e) if initialized => {
                error!(error = %error_chain(&e), "failed to monitor images");
            }
            Err(e) => {
                warn!(error = %error_chain(&e), "failed to monitor images");
            }
        }
    }
}

/// Severity for the `consecutive`-th failed collection pass in a row.
fn failure_level(consecutive: u32) -> Level {
    if consecutive <= 1 {
        Level::WARN
    } else {
        Level::ERROR
    }
}

async fn run_detection_loop(manager: Arc<ImageGcManager>, mut shutdown: watch::Receiver<bool>) {
    let period = manager.policy.gc_period;
    loop {
        if *shutdown.borrow() {
            break;
        }
        manager.detection_tick().await;

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("image detection loop shutting down");
}

async fn run_gc_loop(manager: Arc<ImageGcManager>, mut shutdown: watch::Receiver<bool>) {
    let period = manager.policy.gc_period;
    let mut consecutive_failures: u32 = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }

        match manager.garbage_collect().await {
            Ok(outcome) => {
                consecutive_failures = 0;
                debug!(?outcome, "image garbage collection succeeded");
            }
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                let message = error_chain(&e);
                if failure_level(consecutive_failures) == Level::WARN {
                    warn!(
                        error = %message,
                        "image garbage collection failed once; stats initialization may not have completed yet"
                    );
                } else {
                    error!(
                        error = %message,
                        consecutive_failures,
                        "image garbage collection failed multiple times in a row"
                    );
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("image gc loop shutting down");
}
