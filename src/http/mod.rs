//! HTTP listener exposing health and Prometheus metrics.

pub mod handler;

pub use handler::{run_http_server, HttpState};
