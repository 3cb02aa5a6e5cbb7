//! Error types for shared workers

use serde::Serialize;
use tether_config::ConfigError;
use tether_ipc::IpcError;
use tether_logging::{ErrorInfo, ErrorSeverity};
use thiserror::Error;

/// Label attached to every fault reported to clients
pub const SHARED_WORKER_ERROR_LABEL: &str = "Shared worker error";

/// Terminal fault of a shared worker
///
/// A worker faults at most once; the same fault is observed by every client
/// attached to it, before or after registration.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerFault {
    #[error("Failed to spawn shared worker: {reason}")]
    SpawnFailed { reason: String },

    #[error("Shared worker crashed: {message}")]
    Crashed {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },

    #[error("Shared worker panicked: {message}")]
    Panicked { message: String },

    #[error("Shared worker exited before becoming available ({})", describe_exit(.code))]
    ExitedBeforeReady { code: Option<i32> },

    #[error("Lost contact with shared worker: {reason}")]
    Disconnected { reason: String },
}

impl WorkerFault {
    /// Short machine readable name of the fault
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerFault::SpawnFailed { .. } => "spawn_failed",
            WorkerFault::Crashed { .. } => "crashed",
            WorkerFault::Panicked { .. } => "panicked",
            WorkerFault::ExitedBeforeReady { .. } => "exited_before_ready",
            WorkerFault::Disconnected { .. } => "disconnected",
        }
    }

    /// Structured error reported on a client's status stream
    pub fn to_error_info(&self) -> ErrorInfo {
        let info = ErrorInfo::from_error(self.kind(), SHARED_WORKER_ERROR_LABEL, self)
            .with_severity(ErrorSeverity::High)
            .with_retryable(false);

        match self {
            WorkerFault::Crashed {
                stack: Some(stack), ..
            } => info.with_stack_trace(stack.clone()),
            _ => info,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code".to_string(),
    }
}

/// Operational errors
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Shared worker {worker_id} is not accepting messages")]
    Disconnected { worker_id: String },

    #[error("Session {fork_id} no longer accepts shared worker connections")]
    SessionClosed { fork_id: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),
}
