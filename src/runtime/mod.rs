//! Container runtime abstraction.
//!
//! The garbage collector never talks to a container engine directly; it goes
//! through the [`ImageRuntime`] trait so that the engine binding can be
//! swapped (and faked in tests).  [`docker::DockerCli`] is the production
//! implementation.

pub mod disk;
pub mod docker;
#[cfg(test)]
pub mod fake;

use std::path::{Path, PathBuf};

use anyhow::Result;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One image as reported by the runtime's image listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    /// Canonical image ID (e.g. `sha256:...`).
    pub id: String,
    /// Size of the image in bytes.
    pub size: u64,
}

/// A single snapshot of the filesystem backing the runtime's storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsStats {
    pub capacity_bytes: u64,
    pub available_bytes: u64,
}

impl FsStats {
    /// Percentage of the filesystem in use, `0.0` when capacity is unknown.
    pub fn used_percent(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        let used = self.capacity_bytes.saturating_sub(self.available_bytes);
        100.0 * used as f64 / self.capacity_bytes as f64
    }
}

/// Returned by [`ImageRuntime::inspect_image`] and
/// [`ImageRuntime::remove_image`] when the runtime does not know the image.
#[derive(Debug, thiserror::Error)]
#[error("image not found: {0}")]
pub struct ImageNotFound(pub String);

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Operations the garbage collector needs from a container runtime.
///
/// Implementations are expected to bound every call with a short timeout so
/// that a hung engine surfaces as an ordinary error.
#[async_trait::async_trait]
pub trait ImageRuntime: Send + Sync {
    /// List every image currently stored by the runtime.
    async fn list_images(&self) -> Result<Vec<ImageSummary>>;

    /// Resolve an image reference (tag, digest or ID) to its canonical ID.
    async fn inspect_image(&self, image: &str) -> Result<String>;

    /// Forcefully remove an image by ID.
    async fn remove_image(&self, id: &str) -> Result<()>;

    /// Directory under which the runtime stores its images.
    async fn root_dir(&self) -> Result<PathBuf>;

    /// Capacity and free space of the filesystem holding `path`.
    async fn fs_stats(&self, path: &Path) -> Result<FsStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_percent_of_partially_full_disk() {
        let stats = FsStats {
            capacity_bytes: 200,
            available_bytes: 50,
        };
        assert_eq!(stats.used_percent(), 75.0);
    }

    #[test]
    fn used_percent_of_zero_capacity_is_zero() {
        assert_eq!(FsStats::default().used_percent(), 0.0);
    }

    #[test]
    fn used_percent_never_negative() {
        let stats = FsStats {
            capacity_bytes: 100,
            available_bytes: 150,
        };
        assert_eq!(stats.used_percent(), 0.0);
    }
}
