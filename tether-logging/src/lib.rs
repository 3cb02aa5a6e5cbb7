//! Logging infrastructure for tether
//!
//! Provides tracing subscriber initialisation driven by [`LoggingConfig`] and
//! the structured [`ErrorInfo`] payload used when errors are reported to
//! clients.
//!
//! [`LoggingConfig`]: tether_config::LoggingConfig

pub mod error_info;
pub mod init;
pub mod severity;

pub use error_info::ErrorInfo;
pub use init::{init_logging_from_config, init_simple_tracing};
pub use severity::ErrorSeverity;
