//! In-memory [`ImageRuntime`] for deterministic tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use super::{FsStats, ImageNotFound, ImageRuntime, ImageSummary};

pub const FAKE_ROOT_DIR: &str = "/var/lib/docker";

#[derive(Default)]
struct FakeState {
    images: Vec<ImageSummary>,
    aliases: HashMap<String, String>,
    root_dir: Option<PathBuf>,
    fs_stats: HashMap<PathBuf, FsStats>,
    list_fails: bool,
    failing_aliases: HashSet<String>,
    failing_removals: HashSet<String>,
    removed: Vec<String>,
    list_calls: usize,
}

pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                root_dir: Some(PathBuf::from(FAKE_ROOT_DIR)),
                ..FakeState::default()
            }),
        }
    }

    pub fn add_image(&self, id: &str, size: u64) {
        self.state.lock().unwrap().images.push(ImageSummary {
            id: id.to_string(),
            size,
        });
    }

    /// Drop an image from the listing without recording a removal.
    pub fn forget_image(&self, id: &str) {
        self.state.lock().unwrap().images.retain(|i| i.id != id);
    }

    pub fn alias(&self, alias: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .aliases
            .insert(alias.to_string(), id.to_string());
    }

    pub fn set_root_dir(&self, dir: Option<&str>) {
        self.state.lock().unwrap().root_dir = dir.map(PathBuf::from);
    }

    pub fn set_fs_stats(&self, path: &str, capacity_bytes: u64, available_bytes: u64) {
        self.state.lock().unwrap().fs_stats.insert(
            PathBuf::from(path),
            FsStats {
                capacity_bytes,
                available_bytes,
            },
        );
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.lock().unwrap().list_fails = fail;
    }

    pub fn fail_alias(&self, alias: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_aliases
            .insert(alias.to_string());
    }

    pub fn fail_removal(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_removals
            .insert(id.to_string());
    }

    /// IDs removed so far, in removal order.
    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }
}

#[async_trait::async_trait]
impl ImageRuntime for FakeRuntime {
    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if state.list_fails {
            return Err(anyhow!("cannot connect to the docker daemon"));
        }
        Ok(state.images.clone())
    }

    async fn inspect_image(&self, image: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        if state.failing_aliases.contains(image) {
            return Err(anyhow!("inspect {image}: context deadline exceeded"));
        }
        if let Some(id) = state.aliases.get(image) {
            return Ok(id.clone());
        }
        if state.images.iter().any(|i| i.id == image) {
            return Ok(image.to_string());
        }
        Err(ImageNotFound(image.to_string()).into())
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_removals.contains(id) {
            return Err(anyhow!("conflict: unable to delete {id}"));
        }
        let before = state.images.len();
        state.images.retain(|i| i.id != id);
        if state.images.len() == before {
            return Err(ImageNotFound(id.to_string()).into());
        }
        state.removed.push(id.to_string());
        Ok(())
    }

    async fn root_dir(&self) -> Result<PathBuf> {
        self.state
            .lock()
            .unwrap()
            .root_dir
            .clone()
            .ok_or_else(|| anyhow!("docker info: daemon unreachable"))
    }

    async fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        self.state
            .lock()
            .unwrap()
            .fs_stats
            .get(path)
            .copied()
            .ok_or_else(|| anyhow!("statvfs {}: no such file or directory", path.display()))
    }
}
