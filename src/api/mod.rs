//! HTTP API Module
//!
//! Record provisioning endpoints plus health, status and metrics.
//! Writes are refused while another instance holds leadership.

mod metrics;
mod routes;

pub use metrics::Metrics;
pub use routes::{router, run_api_server, ApiState};
