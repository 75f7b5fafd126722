//! [`ImageRuntime`] implementation that shells out to the `docker` CLI.
//!
//! Every call spawns the configured binary through [`tokio::process::Command`]
//! and is bounded by `call_timeout`.  Child processes are spawned with
//! `kill_on_drop` so an expired call does not leave a stray `docker` process
//! behind.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{disk, FsStats, ImageNotFound, ImageRuntime, ImageSummary};
use crate::config::RuntimeConfig;

// ---------------------------------------------------------------------------
// DockerCli
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    call_timeout: Duration,
}

impl DockerCli {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            binary: config.docker_binary.clone(),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// Spawn `docker <args>` and collect its output, bounded by
    /// `call_timeout`.
    async fn exec(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let command_line = args.join(" ");
        debug!(binary = %self.binary, args = %command_line, "spawning docker");

        tokio::time::timeout(self.call_timeout, cmd.output())
            .await
            .map_err(|_| {
                anyhow!(
                    "{} {} timed out after {:?}",
                    self.binary,
                    command_line,
                    self.call_timeout
                )
            })?
            .with_context(|| format!("failed to spawn {} {}", self.binary, command_line))
    }

    /// Run `docker <args>` and return its stdout.
    ///
    /// A non-zero exit whose stderr mentions `No such image` is mapped to
    /// [`ImageNotFound`] so callers can tell a missing image from a failing
    /// engine.
    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.exec(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if let Some(image) = missing_image(&stderr) {
                return Err(ImageNotFound(image).into());
            }
            bail!(
                "{} {} failed (status {}): {}",
                self.binary,
                args.join(" "),
                output.status,
                stderr.trim(),
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Inspect a batch of listed IDs.
    ///
    /// Images removed between the listing and this call make docker exit
    /// non-zero while still printing the rest; those IDs are dropped.
    async fn inspect_listed(&self, ids: &[String]) -> Result<Vec<ImageSummary>> {
        let mut args = vec!["image", "inspect"];
        args.extend(ids.iter().map(String::as_str));
        let output = self.exec(&args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let vanished = vanished_images(&stderr).with_context(|| {
                format!(
                    "{} image inspect failed (status {}): {}",
                    self.binary,
                    output.status,
                    stderr.trim()
                )
            })?;
            debug!(vanished = %vanished.join(","), "images removed since listing");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        parse_inspect_output(&stdout)
    }
}

#[async_trait::async_trait]
impl ImageRuntime for DockerCli {
    #[instrument(skip(self))]
    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let stdout = self
            .run(&["image", "ls", "--quiet", "--no-trunc"])
            .await?;
        let ids = parse_image_ids(&stdout);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.inspect_listed(&ids).await
    }

    #[instrument(skip(self))]
    async fn inspect_image(&self, image: &str) -> Result<String> {
        let stdout = self
            .run(&["image", "inspect", "--format", "{{.Id}}", image])
            .await?;
        let id = stdout.trim();
        if id.is_empty() {
            return Err(ImageNotFound(image.to_string()).into());
        }
        Ok(id.to_string())
    }

    #[instrument(skip(self))]
    async fn remove_image(&self, id: &str) -> Result<()> {
        let stdout = self.run(&["image", "rm", "--force", id]).await?;
        for line in stdout.lines() {
            if let Some(untagged) = line.strip_prefix("Untagged: ") {
                debug!(%untagged, "image untagged");
            } else if let Some(deleted) = line.strip_prefix("Deleted: ") {
                debug!(%deleted, "image deleted");
            }
        }
        Ok(())
    }

    async fn root_dir(&self) -> Result<PathBuf> {
        let stdout = self
            .run(&["info", "--format", "{{.DockerRootDir}}"])
            .await
            .context("docker info")?;
        let dir = stdout.trim();
        if dir.is_empty() {
            bail!("docker info returned an empty DockerRootDir");
        }
        Ok(PathBuf::from(dir))
    }

    async fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || disk::probe(&path))
            .await
            .context("disk probe task failed")?
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Size", default)]
    size: u64,
}

/// Parse `docker image ls --quiet --no-trunc` output.
///
/// An image with several tags is listed once per tag; duplicates are dropped
/// while keeping first-seen order.
fn parse_image_ids(stdout: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !ids.iter().any(|id| id == line) {
            ids.push(line.to_string());
        }
    }
    ids
}

/// Parse the JSON array printed by `docker image inspect <ids..>`.
fn parse_inspect_output(stdout: &str) -> Result<Vec<ImageSummary>> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(stdout).context("failed to parse docker image inspect output")?;
    Ok(entries
        .into_iter()
        .map(|e| ImageSummary {
            id: e.id,
            size: e.size,
        })
        .collect())
}

/// Extract the image reference from a `No such image: <ref>` error.
fn missing_image(stderr: &str) -> Option<String> {
    let (_, rest) = stderr.split_once("No such image")?;
    let image = rest.trim_start_matches(':').trim();
    Some(image.lines().next().unwrap_or_default().to_string())
}

/// References named by `No such image` lines, or `None` when stderr
/// reports any other failure.
fn vanished_images(stderr: &str) -> Option<Vec<String>> {
    let vanished: Vec<String> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(missing_image)
        .collect::<Option<_>>()?;
    (!vanished.is_empty()).then_some(vanished)
}
