//! Node-local image garbage collection.
//!
//! Provides an [`ImageGcManager`] that keeps the container runtime's image
//! cache inside a disk budget: once usage of the image filesystem reaches
//! the policy's high threshold, the least recently used images that are not
//! in use and are older than the minimum age are removed until usage drops
//! to the low threshold.

pub mod eviction;
pub mod manager;
pub mod policy;
pub mod records;
pub mod scheduler;

pub use manager::{GcOutcome, ImageGcManager};
pub use policy::ImageGcPolicy;
