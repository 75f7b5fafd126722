//! Filesystem capacity probe backed by `statvfs(3)`.

use std::path::Path;

use anyhow::{Context, Result};
use nix::sys::statvfs::statvfs;

use super::FsStats;

/// Read capacity and available bytes for the filesystem containing `path`.
///
/// `available` is the space usable by unprivileged processes
/// (`f_bavail`), matching what `df` reports.
pub fn probe(path: &Path) -> Result<FsStats> {
    let stat = statvfs(path).with_context(|| format!("statvfs {}", path.display()))?;
    let fragment = stat.fragment_size() as u64;
    Ok(FsStats {
        capacity_bytes: (stat.blocks() as u64).saturating_mul(fragment),
        available_bytes: (stat.blocks_available() as u64).saturating_mul(fragment),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reports_tempdir_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        let stats = probe(tmp.path()).unwrap();
        assert!(stats.capacity_bytes > 0);
        assert!(stats.available_bytes <= stats.capacity_bytes);
    }

    #[test]
    fn probe_missing_path_fails() {
        let err = probe(Path::new("/nonexistent/imagegcd/probe")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/imagegcd/probe"));
    }
}
