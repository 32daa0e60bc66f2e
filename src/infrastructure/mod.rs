//! Infrastructure layer modules
//!
//! Shared components used by every other layer:
//! - `config`: Application configuration and settings
//! - `error`: HTTP-facing error type
//! - `metrics`: Prometheus metrics and recording helpers

pub mod config;
pub mod error;
pub mod metrics;
