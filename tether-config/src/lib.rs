//! Domain-driven configuration management for tether
//!
//! Configuration is split by functional domain, validated per domain, and can
//! be overridden through `TETHER_*` environment variables.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    logging::{LogFormat, LogLevel, LoggingConfig},
    workers::SharedWorkerConfig,
    TetherConfig,
};
