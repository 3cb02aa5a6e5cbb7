//! Shared worker configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};

/// Configuration for launching and observing shared workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedWorkerConfig {
    /// Flags passed to every spawned worker ahead of its own arguments
    #[serde(default)]
    pub exec_flags: Vec<String>,

    /// Capacity of each worker's message broadcast
    #[serde(default = "default_message_buffer")]
    pub message_buffer: usize,

    /// Program run for out-of-process workers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,

    /// Arguments passed to `program` after the exec flags
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for SharedWorkerConfig {
    fn default() -> Self {
        Self {
            exec_flags: Vec::new(),
            message_buffer: default_message_buffer(),
            program: None,
            args: Vec::new(),
        }
    }
}

impl Validatable for SharedWorkerConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.message_buffer, "message_buffer", self.domain_name())?;

        for flag in &self.exec_flags {
            validate_required_string(flag, "exec_flags entry", self.domain_name())?;
        }

        if let Some(program) = &self.program {
            validate_required_string(&program.to_string_lossy(), "program", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "workers"
    }
}

fn default_message_buffer() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_defaults() {
        let config = SharedWorkerConfig::default();
        assert!(config.exec_flags.is_empty());
        assert_eq!(config.message_buffer, 1024);
        assert!(config.program.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_config_validation() {
        let mut config = SharedWorkerConfig::default();

        config.message_buffer = 0;
        assert!(config.validate().is_err());

        config.message_buffer = 16;
        config.exec_flags = vec!["--strict".to_string(), String::new()];
        assert!(config.validate().is_err());

        config.exec_flags = vec!["--strict".to_string()];
        config.program = Some(PathBuf::new());
        assert!(config.validate().is_err());

        config.program = Some(PathBuf::from("/usr/bin/worker"));
        assert!(config.validate().is_ok());
    }
}
