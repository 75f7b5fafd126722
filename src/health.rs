use axum::http::StatusCode;
use serde::Serialize;

use crate::error::error_chain;
use crate::gc::ImageGcManager;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Whether the first image detection pass has completed.
    pub initialized: bool,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub runtime: CheckResult,
    pub disk: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: Some(detail.into()),
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

async fn check_runtime(manager: &ImageGcManager) -> CheckResult {
    match manager.runtime().root_dir().await {
        Ok(dir) => CheckResult::healthy(format!("root dir {}", dir.display())),
        Err(e) => CheckResult::unhealthy(format!("runtime unreachable: {e:#}")),
    }
}

async fn check_disk(manager: &ImageGcManager) -> CheckResult {
    match manager.probe_image_fs().await {
        Ok(stats) => CheckResult::healthy(format!(
            "{:.1}% used (high threshold {}%)",
            stats.used_percent(),
            manager.policy().high_threshold_percent
        )),
        Err(e) => CheckResult::unhealthy(error_chain(&e)),
    }
}

// ---------------------------------------------------------------------------
// Aggregate status
// ---------------------------------------------------------------------------

/// The disk probe is required; a runtime that cannot report its root dir
/// only degrades collection to the default root.
fn aggregate_status(checks: &HealthChecks) -> HealthStatus {
    if !checks.disk.ok {
        HealthStatus::Unhealthy
    } else if !checks.runtime.ok {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    }
}

/// Run every check.  Returns 200 on Ok/Degraded, 503 on Unhealthy.
pub async fn check(manager: &ImageGcManager) -> (StatusCode, HealthResponse) {
    let (runtime, disk) = tokio::join!(check_runtime(manager), check_disk(manager));

    let checks = HealthChecks { runtime, disk };
    let status = aggregate_status(&checks);
    let body = HealthResponse {
        status,
        initialized: manager.is_initialized(),
        checks,
    };

    let http_status = match status {
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, body)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::gc::ImageGcPolicy;
    use crate::metrics::MetricsRegistry;
    use crate::runtime::fake::{FakeRuntime, FAKE_ROOT_DIR};
    use crate::runtime::ImageRuntime;

    fn manager(fake: &Arc<FakeRuntime>) -> ImageGcManager {
        let policy =
            ImageGcPolicy::new(90, 75, Duration::ZERO, Duration::from_secs(60)).unwrap();
        let runtime: Arc<dyn ImageRuntime> = fake.clone();
        ImageGcManager::new(runtime, policy, "pause:3.0", MetricsRegistry::new()).unwrap()
    }

    #[tokio::test]
    async fn healthy_when_runtime_and_disk_respond() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_fs_stats(FAKE_ROOT_DIR, 100, 40);

        let (code, body) = check(&manager(&fake)).await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, HealthStatus::Ok);
        assert!(!body.initialized);
    }

    #[tokio::test]
    async fn degraded_when_only_fallback_root_works() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_root_dir(None);
        fake.set_fs_stats(FAKE_ROOT_DIR, 100, 40);

        let (code, body) = check(&manager(&fake)).await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn unhealthy_when_disk_cannot_be_probed() {
        let fake = Arc::new(FakeRuntime::new());

        let (code, body) = check(&manager(&fake)).await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, HealthStatus::Unhealthy);
        assert!(!body.checks.disk.ok);
        let detail = body.checks.disk.detail.unwrap();
        assert!(detail.contains("failed to read filesystem stats for /var/lib/docker"));
        assert!(detail.contains("no such file or directory"));
    }
}
