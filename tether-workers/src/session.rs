//! Client sessions and their shared worker connection requests
//!
//! Each forked test run is a [`ClientSession`]. The run asks for shared
//! workers through a [`SharedWorkerConnector`]; the host side consumes the
//! matching [`Fork`] and attaches every request to its worker.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use tether_ipc::MessagePort;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::error::{WorkerError, WorkerFault};
use crate::types::ResourceKey;

/// Resolves once a session's task has finished
#[derive(Clone)]
pub struct TaskCompletion {
    inner: Shared<BoxFuture<'static, ()>>,
}

impl TaskCompletion {
    /// A completion together with the trigger that fires it
    ///
    /// Dropping the trigger also completes the task.
    pub fn channel() -> (CompletionTrigger, TaskCompletion) {
        let (tx, rx) = oneshot::channel::<()>();
        (CompletionTrigger { tx }, TaskCompletion::from_future(rx))
    }

    pub fn from_future<F>(future: F) -> Self
    where
        F: Future + Send + 'static,
    {
        Self {
            inner: future.map(|_| ()).boxed().shared(),
        }
    }

    /// A task that has already finished
    pub fn completed() -> Self {
        Self::from_future(futures::future::ready(()))
    }

    pub async fn wait(&self) {
        self.inner.clone().await
    }
}

impl fmt::Debug for TaskCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCompletion").finish_non_exhaustive()
    }
}

/// Completes the paired [`TaskCompletion`]
#[derive(Debug)]
pub struct CompletionTrigger {
    tx: oneshot::Sender<()>,
}

impl CompletionTrigger {
    pub fn complete(self) {
        let _ = self.tx.send(());
    }
}

/// One forked client session
#[derive(Debug, Clone)]
pub struct ClientSession {
    fork_id: String,
    file: PathBuf,
    completion: TaskCompletion,
}

impl ClientSession {
    pub fn new(file: impl Into<PathBuf>, completion: TaskCompletion) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), file, completion)
    }

    pub fn with_id(
        fork_id: impl Into<String>,
        file: impl Into<PathBuf>,
        completion: TaskCompletion,
    ) -> Self {
        Self {
            fork_id: fork_id.into(),
            file: file.into(),
            completion,
        }
    }

    pub fn fork_id(&self) -> &str {
        &self.fork_id
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn completion(&self) -> &TaskCompletion {
        &self.completion
    }

    /// The session's file as a `file://` URL
    ///
    /// Relative paths cannot be expressed as file URLs and are returned as is.
    pub fn file_url(&self) -> String {
        Url::from_file_path(&self.file)
            .map(String::from)
            .unwrap_or_else(|_| self.file.display().to_string())
    }
}

/// Channel on which a client learns about its worker's fatal fault
#[derive(Debug)]
pub struct FatalErrorSignal {
    tx: oneshot::Sender<WorkerFault>,
}

impl FatalErrorSignal {
    pub fn channel() -> (FatalErrorSignal, oneshot::Receiver<WorkerFault>) {
        let (tx, rx) = oneshot::channel();
        (FatalErrorSignal { tx }, rx)
    }

    pub fn signal(self, fault: WorkerFault) {
        if self.tx.send(fault).is_err() {
            debug!("Client stopped listening for shared worker faults");
        }
    }
}

/// A client's request to be connected to a shared worker
#[derive(Debug)]
pub struct ConnectRequest {
    pub resource_key: ResourceKey,
    pub initial_data: JsonValue,
    /// Worker side of the client's port, handed to the worker on registration
    pub port: MessagePort,
    pub on_fatal_error: FatalErrorSignal,
}

impl ConnectRequest {
    /// Build a request and the client's side of the connection
    pub fn new(
        resource_key: impl Into<ResourceKey>,
        initial_data: JsonValue,
    ) -> (ConnectRequest, SharedWorkerConnection) {
        let (client_port, worker_port) = MessagePort::pair();
        let (on_fatal_error, fatal_error) = FatalErrorSignal::channel();

        (
            ConnectRequest {
                resource_key: resource_key.into(),
                initial_data,
                port: worker_port,
                on_fatal_error,
            },
            SharedWorkerConnection {
                port: client_port,
                fatal_error,
            },
        )
    }
}

/// Client side of a shared worker connection
#[derive(Debug)]
pub struct SharedWorkerConnection {
    pub port: MessagePort,
    pub fatal_error: oneshot::Receiver<WorkerFault>,
}

/// Host side of a session: the session and its stream of connect requests
#[derive(Debug)]
pub struct Fork {
    session: ClientSession,
    connections: mpsc::UnboundedReceiver<ConnectRequest>,
}

impl Fork {
    pub fn new(session: ClientSession) -> (Fork, SharedWorkerConnector) {
        let (requests, connections) = mpsc::unbounded_channel();
        let connector = SharedWorkerConnector {
            fork_id: session.fork_id().to_string(),
            requests,
        };

        (
            Fork {
                session,
                connections,
            },
            connector,
        )
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn into_parts(self) -> (ClientSession, mpsc::UnboundedReceiver<ConnectRequest>) {
        (self.session, self.connections)
    }
}

/// Issues connect requests on behalf of a session
#[derive(Debug, Clone)]
pub struct SharedWorkerConnector {
    fork_id: String,
    requests: mpsc::UnboundedSender<ConnectRequest>,
}

impl SharedWorkerConnector {
    pub fn connect(
        &self,
        resource_key: impl Into<ResourceKey>,
        initial_data: JsonValue,
    ) -> Result<SharedWorkerConnection, WorkerError> {
        let (request, connection) = ConnectRequest::new(resource_key, initial_data);
        self.requests
            .send(request)
            .map_err(|_| WorkerError::SessionClosed {
                fork_id: self.fork_id.clone(),
            })?;
        Ok(connection)
    }
}
