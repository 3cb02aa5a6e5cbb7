//! Structured error payloads reported to clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use crate::severity::ErrorSeverity;

/// Serializable description of an error: a human readable label plus the
/// underlying cause
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub severity: ErrorSeverity,
    pub is_retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, JsonValue>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            cause: None,
            severity: ErrorSeverity::Medium,
            is_retryable: false,
            stack_trace: None,
            context: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Describe `error` under `label`, flattening its source chain into the cause
    pub fn from_error<E>(error_type: impl Into<String>, label: impl Into<String>, error: &E) -> Self
    where
        E: StdError + ?Sized,
    {
        let mut cause = error.to_string();
        let mut source = error.source();
        while let Some(inner) = source {
            cause.push_str(": ");
            cause.push_str(&inner.to_string());
            source = inner.source();
        }

        Self::new(error_type, label).with_cause(cause)
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_retryable(mut self, is_retryable: bool) -> Self {
        self.is_retryable = is_retryable;
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_context_value(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.context.insert(key.into(), json_value);
        }
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.message, cause),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("worker crashed")]
    struct Crashed {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn test_from_error_flattens_sources() {
        let error = Crashed {
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"),
        };

        let info = ErrorInfo::from_error("crashed", "Shared worker error", &error);
        assert_eq!(info.error_type, "crashed");
        assert_eq!(info.message, "Shared worker error");
        assert_eq!(info.cause.as_deref(), Some("worker crashed: pipe closed"));
        assert_eq!(info.to_string(), "Shared worker error: worker crashed: pipe closed");
    }

    #[test]
    fn test_builder_and_serialization() {
        let info = ErrorInfo::new("spawn_failed", "Shared worker error")
            .with_severity(ErrorSeverity::High)
            .with_retryable(false)
            .with_context_value("worker_id", "shared-worker/1");

        assert_eq!(info.severity, ErrorSeverity::High);

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["severity"], "high");
        assert_eq!(value["context"], json!({"worker_id": "shared-worker/1"}));
        assert!(value.get("cause").is_none());
        assert!(value.get("stack_trace").is_none());
    }
}
