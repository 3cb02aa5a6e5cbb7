//! Boundary between the registry and concrete worker implementations
//!
//! A [`WorkerSpawner`] turns a [`SpawnRequest`] into a running worker and
//! returns the host side of the link. The worker side is a
//! [`WorkerEndpoint`]: it receives [`HostMessage`]s and reports
//! [`WorkerEvent`]s. Spawning never fails synchronously; a worker that cannot
//! be started reports an error event followed by an exit event.

use serde_json::Value as JsonValue;
use tether_ipc::{MessagePort, WorkerInit, WorkerMessage};
use tokio::sync::mpsc;

use crate::error::WorkerFault;
use crate::types::ResourceKey;

/// Everything a spawner needs to start one worker
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub key: ResourceKey,
    pub id: String,
    pub initial_data: JsonValue,
    pub exec_flags: Vec<String>,
}

impl SpawnRequest {
    /// Initialization payload delivered to the worker
    pub fn init(&self) -> WorkerInit {
        WorkerInit {
            filename: self.key.to_string(),
            id: self.id.clone(),
            initial_data: self.initial_data.clone(),
        }
    }
}

/// Messages the host sends to a worker
#[derive(Debug)]
pub enum HostMessage {
    /// Register a client session and hand over its port
    RegisterTestWorker {
        id: String,
        file: String,
        port: MessagePort,
    },

    /// Ask the worker to drop a client session
    DeregisterTestWorker { id: String },
}

/// Lifecycle events reported by a worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Message(WorkerMessage),
    Error(WorkerFault),
    Exit(Option<i32>),
}

/// Host side of a freshly spawned worker
#[derive(Debug)]
pub struct SpawnedWorker {
    pub outbound: mpsc::UnboundedSender<HostMessage>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
}

/// Worker side of the link
#[derive(Debug)]
pub struct WorkerEndpoint {
    inbox: mpsc::UnboundedReceiver<HostMessage>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerEndpoint {
    /// Report a protocol message; false once the host stopped listening
    pub fn send(&self, message: WorkerMessage) -> bool {
        self.events.send(WorkerEvent::Message(message)).is_ok()
    }

    pub fn fail(&self, fault: WorkerFault) -> bool {
        self.events.send(WorkerEvent::Error(fault)).is_ok()
    }

    pub fn exit(&self, code: Option<i32>) -> bool {
        self.events.send(WorkerEvent::Exit(code)).is_ok()
    }

    /// Report a start-up failure: the fault, then an exit without a code
    pub fn abort(self, fault: WorkerFault) {
        self.fail(fault);
        self.exit(None);
    }

    pub async fn recv(&mut self) -> Option<HostMessage> {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Option<HostMessage> {
        self.inbox.try_recv().ok()
    }

    /// Another handle for reporting events, independent of this endpoint
    pub fn events(&self) -> mpsc::UnboundedSender<WorkerEvent> {
        self.events.clone()
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedReceiver<HostMessage>,
        mpsc::UnboundedSender<WorkerEvent>,
    ) {
        (self.inbox, self.events)
    }
}

/// Create the two halves of a host/worker link
pub fn worker_link() -> (SpawnedWorker, WorkerEndpoint) {
    let (outbound, inbox) = mpsc::unbounded_channel();
    let (events_tx, events) = mpsc::unbounded_channel();

    (
        SpawnedWorker { outbound, events },
        WorkerEndpoint {
            inbox,
            events: events_tx,
        },
    )
}

/// Starts shared workers
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, request: SpawnRequest) -> SpawnedWorker;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_link_carries_both_directions() {
        let (mut spawned, mut endpoint) = worker_link();

        spawned
            .outbound
            .send(HostMessage::DeregisterTestWorker {
                id: "fork-1".to_string(),
            })
            .unwrap();
        assert!(matches!(
            endpoint.recv().await,
            Some(HostMessage::DeregisterTestWorker { id }) if id == "fork-1"
        ));

        assert!(endpoint.send(WorkerMessage::Available));
        assert_eq!(
            spawned.events.recv().await,
            Some(WorkerEvent::Message(WorkerMessage::Available))
        );
    }

    #[tokio::test]
    async fn test_abort_reports_fault_then_exit() {
        let (mut spawned, endpoint) = worker_link();
        let fault = WorkerFault::SpawnFailed {
            reason: "missing".to_string(),
        };

        endpoint.abort(fault.clone());

        assert_eq!(spawned.events.recv().await, Some(WorkerEvent::Error(fault)));
        assert_eq!(spawned.events.recv().await, Some(WorkerEvent::Exit(None)));
        assert_eq!(spawned.events.recv().await, None);
    }

    #[test]
    fn test_spawn_request_init() {
        let request = SpawnRequest {
            key: ResourceKey::new("/srv/cache.js"),
            id: "shared-worker/1".to_string(),
            initial_data: json!({"size": 3}),
            exec_flags: vec![],
        };

        let init = request.init();
        assert_eq!(init.filename, "/srv/cache.js");
        assert_eq!(init.id, "shared-worker/1");
        assert_eq!(init.initial_data, json!({"size": 3}));
    }
}
