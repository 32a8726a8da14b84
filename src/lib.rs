//! tokenpatrol: scans a GitLab instance for project, group and personal
//! access tokens nearing expiry and exports their remaining lifetime as
//! Prometheus gauges.
//!
//! The library holds the whole pipeline so integration tests in `tests/`
//! can drive it against a mock GitLab.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod expiry;
pub mod gitlab;
pub mod jobs;
pub mod metrics;
pub mod pattern;
pub mod scan;
