use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::GcError;
use crate::gc::ImageGcPolicy;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub image_gc: ImageGcConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

// ---------------------------------------------------------------------------
// Image GC
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ImageGcConfig {
    /// Run the detection and collection loops at all.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Disk usage percentage at or above which collection always runs.
    /// Set to 100 to effectively disable collection.
    #[serde(default = "default_high_threshold")]
    pub high_threshold_percent: i32,
    /// Disk usage percentage a collection pass tries to get down to.
    #[serde(default = "default_low_threshold")]
    pub low_threshold_percent: i32,
    /// Minimum age (seconds) of an unused image before it can be collected.
    #[serde(default = "default_minimum_age")]
    pub minimum_age_secs: u64,
    /// Period (seconds) of both the detection and the collection loop.
    #[serde(default = "default_period")]
    pub period_secs: u64,
    /// Pod sandbox / infrastructure image, never collected.
    #[serde(default = "default_sandbox_image")]
    pub sandbox_image: String,
    /// Initial set of image references treated as in use.
    #[serde(default)]
    pub service_images: Vec<String>,
}

impl Default for ImageGcConfig {
    fn default() -> Self {
        Self {
            enabled: bool_true(),
            high_threshold_percent: default_high_threshold(),
            low_threshold_percent: default_low_threshold(),
            minimum_age_secs: default_minimum_age(),
            period_secs: default_period(),
            sandbox_image: default_sandbox_image(),
            service_images: Vec::new(),
        }
    }
}

impl ImageGcConfig {
    /// Build the validated [`ImageGcPolicy`] described by this section.
    pub fn policy(&self) -> Result<ImageGcPolicy, GcError> {
        ImageGcPolicy::new(
            self.high_threshold_percent,
            self.low_threshold_percent,
            Duration::from_secs(self.minimum_age_secs),
            Duration::from_secs(self.period_secs),
        )
    }
}

fn bool_true() -> bool {
    true
}

fn default_high_threshold() -> i32 {
    90
}

fn default_low_threshold() -> i32 {
    75
}

fn default_minimum_age() -> u64 {
    2 * 3600
}

fn default_period() -> u64 {
    300
}

fn default_sandbox_image() -> String {
    "goodrain.me/pause-amd64:3.0".to_string()
}

// ---------------------------------------------------------------------------
// Container runtime
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Path or name of the `docker` CLI binary.
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
    /// Timeout (seconds) applied to every runtime call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Storage root probed when the runtime cannot report its own.
    #[serde(default = "default_root_dir")]
    pub default_root_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_binary: default_docker_binary(),
            call_timeout_secs: default_call_timeout(),
            default_root_dir: default_root_dir(),
        }
    }
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_call_timeout() -> u64 {
    3
}

fn default_root_dir() -> String {
    crate::gc::manager::DEFAULT_ROOT_DIR.to_string()
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Socket address for `/metrics` and `/healthz` (e.g. `0.0.0.0:6101`).
    /// The listener is disabled when unset.
    pub listen: Option<String>,
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&contents)
        .with_context(|| format!("failed to load config file: {}", path.display()))
}

/// Parse and validate a [`Config`] from YAML text.
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents).context("invalid YAML")?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    config.image_gc.policy()?;
    anyhow::ensure!(
        config.image_gc.period_secs > 0,
        "image_gc.period_secs must be greater than 0"
    );
    anyhow::ensure!(
        config.runtime.call_timeout_secs > 0,
        "runtime.call_timeout_secs must be greater than 0"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert!(config.image_gc.enabled);
        assert_eq!(config.image_gc.high_threshold_percent, 90);
        assert_eq!(config.image_gc.low_threshold_percent, 75);
        assert_eq!(config.image_gc.minimum_age_secs, 7200);
        assert_eq!(config.image_gc.period_secs, 300);
        assert_eq!(config.runtime.docker_binary, "docker");
        assert_eq!(config.runtime.call_timeout_secs, 3);
        assert_eq!(config.runtime.default_root_dir, "/var/lib/docker");
        assert!(config.metrics.listen.is_none());
    }

    #[test]
    fn full_document_round_trips_into_policy() {
        let yaml = r#"
image_gc:
  enabled: true
  high_threshold_percent: 85
  low_threshold_percent: 80
  minimum_age_secs: 3600
  period_secs: 60
  sandbox_image: "registry.local/pause:3.9"
  service_images: ["nginx:1.25", "redis:7"]
runtime:
  docker_binary: /usr/bin/docker
  call_timeout_secs: 5
metrics:
  listen: "127.0.0.1:6101"
"#;
        let config = parse_config(yaml).unwrap();
        let policy = config.image_gc.policy().unwrap();
        assert_eq!(policy.high_threshold_percent, 85);
        assert_eq!(policy.low_threshold_percent, 80);
        assert_eq!(policy.min_age, Duration::from_secs(3600));
        assert_eq!(policy.gc_period, Duration::from_secs(60));
        assert_eq!(config.image_gc.service_images, ["nginx:1.25", "redis:7"]);
        assert_eq!(config.metrics.listen.as_deref(), Some("127.0.0.1:6101"));
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let yaml = "image_gc:\n  high_threshold_percent: 70\n  low_threshold_percent: 80\n";
        let err = parse_config(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("can not be higher"));
    }

    #[test]
    fn zero_period_is_rejected() {
        assert!(parse_config("image_gc:\n  period_secs: 0\n").is_err());
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "image_gc:\n  enabled: false\n").unwrap();

        let config = load_config(&path).unwrap();
        assert!(!config.image_gc.enabled);
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config("/nonexistent/imagegcd.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
