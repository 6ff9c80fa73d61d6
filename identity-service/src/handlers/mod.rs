//! HTTP handlers: probes, metrics, provisioning and per-node housekeeping.

pub mod governance;
pub mod health;
pub mod housekeeping;
pub mod requests;

pub use health::{health_check, metrics_endpoint, readiness_check};
