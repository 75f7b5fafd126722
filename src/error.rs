//! Error kinds surfaced by the image garbage collector.
//!
//! Every variant is pass-local: the scheduler logs it and retries on the next
//! period.  Only [`GcError::InvalidPolicy`] is returned at construction time.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GcError {
    /// Threshold percentages out of range or inverted.
    #[error("invalid image gc policy: {0}")]
    InvalidPolicy(String),

    /// The runtime could not list its images; the record store is untouched.
    #[error("failed to list images from the container runtime")]
    ListImages(#[source] anyhow::Error),

    /// Filesystem statistics could not be read, even on the fallback root.
    #[error("failed to read filesystem stats for {}", path.display())]
    DiskProbe {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid capacity 0 on image filesystem")]
    ZeroCapacity,

    /// The eviction walk ran out of candidates before reaching its budget.
    #[error(
        "failed to garbage collect required amount of images: wanted to free {wanted} bytes, but freed {freed} bytes{}",
        format_failures(.failures)
    )]
    Shortfall {
        wanted: u64,
        freed: u64,
        failures: Vec<String>,
    },
}

/// Render `err` followed by each of its causes, `outer: inner: root`.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn format_failures(failures: &[String]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!(" ({} deletion errors: {})", failures.len(), failures.join("; "))
    }
}
