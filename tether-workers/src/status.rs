//! Status events reported on a client's run status stream

use serde::Serialize;
use tether_logging::ErrorInfo;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::WorkerFault;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StatusEvent {
    /// A shared worker the client depends on faulted
    SharedWorkerError { err: ErrorInfo },
}

impl StatusEvent {
    pub fn shared_worker_error(fault: &WorkerFault) -> Self {
        StatusEvent::SharedWorkerError {
            err: fault.to_error_info(),
        }
    }
}

/// Sender half of a client's run status stream
#[derive(Debug, Clone)]
pub struct RunStatus {
    events: mpsc::UnboundedSender<StatusEvent>,
}

impl RunStatus {
    pub fn channel() -> (RunStatus, mpsc::UnboundedReceiver<StatusEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (RunStatus { events }, rx)
    }

    pub fn emit_state_change(&self, event: StatusEvent) {
        if self.events.send(event).is_err() {
            debug!("Run status stream closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_worker_error_shape() {
        let event = StatusEvent::shared_worker_error(&WorkerFault::ExitedBeforeReady { code: Some(1) });
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "shared-worker-error");
        assert_eq!(value["err"]["message"], "Shared worker error");
        assert_eq!(value["err"]["error_type"], "exited_before_ready");
    }

    #[tokio::test]
    async fn test_emit_state_change() {
        let (status, mut events) = RunStatus::channel();
        status.emit_state_change(StatusEvent::shared_worker_error(&WorkerFault::Disconnected {
            reason: "stdout closed".to_string(),
        }));

        let StatusEvent::SharedWorkerError { err } = events.recv().await.unwrap();
        assert_eq!(err.error_type, "disconnected");
    }
}
