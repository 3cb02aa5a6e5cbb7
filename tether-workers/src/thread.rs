//! In-process shared workers running on dedicated threads
//!
//! Worker entry points are registered by resource key in a
//! [`WorkerCatalog`]. Each launched worker gets its own detached OS thread
//! with a single-threaded runtime, so a busy or stuck worker never blocks the
//! host's executor and never keeps the host alive.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tether_ipc::{WorkerInit, WorkerMessage};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{WorkerError, WorkerFault};
use crate::spawn::{
    worker_link, HostMessage, SpawnRequest, SpawnedWorker, WorkerEndpoint, WorkerEvent, WorkerSpawner,
};
use crate::types::ResourceKey;

type WorkerEntry = dyn Fn(WorkerContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Worker entry points by resource key
#[derive(Clone, Default)]
pub struct WorkerCatalog {
    entries: HashMap<ResourceKey, Arc<WorkerEntry>>,
}

impl WorkerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the entry point run for `key`
    pub fn register<F, Fut>(&mut self, key: impl Into<ResourceKey>, entry: F) -> &mut Self
    where
        F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let entry: Arc<WorkerEntry> = Arc::new(move |context: WorkerContext| entry(context).boxed());
        self.entries.insert(key.into(), entry);
        self
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(key)
    }

    fn entry(&self, key: &ResourceKey) -> Option<Arc<WorkerEntry>> {
        self.entries.get(key).cloned()
    }
}

impl fmt::Debug for WorkerCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// What a running worker sees of the host
#[derive(Debug)]
pub struct WorkerContext {
    init: WorkerInit,
    key: ResourceKey,
    exec_flags: Vec<String>,
    endpoint: WorkerEndpoint,
}

impl WorkerContext {
    fn new(request: SpawnRequest, endpoint: WorkerEndpoint) -> Self {
        Self {
            init: request.init(),
            key: request.key,
            exec_flags: request.exec_flags,
            endpoint,
        }
    }

    pub fn id(&self) -> &str {
        &self.init.id
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn initial_data(&self) -> &JsonValue {
        &self.init.initial_data
    }

    pub fn exec_flags(&self) -> &[String] {
        &self.exec_flags
    }

    /// Tell the host the worker is ready for registrations
    pub fn announce_available(&self) -> Result<(), WorkerError> {
        self.report(WorkerMessage::Available)
    }

    /// Confirm that session `id` has been dropped
    pub fn acknowledge_deregistration(&self, id: impl Into<String>) -> Result<(), WorkerError> {
        self.report(WorkerMessage::DeregisteredTestWorker { id: id.into() })
    }

    /// Next message from the host, `None` once the host is gone
    pub async fn next_message(&mut self) -> Option<HostMessage> {
        self.endpoint.recv().await
    }

    fn report(&self, message: WorkerMessage) -> Result<(), WorkerError> {
        if self.endpoint.send(message) {
            Ok(())
        } else {
            Err(WorkerError::Disconnected {
                worker_id: self.init.id.clone(),
            })
        }
    }
}

/// Runs catalog entries on dedicated threads
#[derive(Debug, Clone)]
pub struct ThreadSpawner {
    catalog: WorkerCatalog,
}

impl ThreadSpawner {
    pub fn new(catalog: WorkerCatalog) -> Self {
        Self { catalog }
    }
}

impl WorkerSpawner for ThreadSpawner {
    fn spawn(&self, request: SpawnRequest) -> SpawnedWorker {
        let (spawned, endpoint) = worker_link();

        let Some(entry) = self.catalog.entry(&request.key) else {
            warn!(key = %request.key, "No shared worker registered for key");
            endpoint.abort(WorkerFault::SpawnFailed {
                reason: format!("no shared worker registered for {}", request.key),
            });
            return spawned;
        };

        let events = endpoint.events();
        let thread = std::thread::Builder::new()
            .name(request.id.clone())
            .spawn(move || run_worker(entry, request, endpoint));

        // Dropping the join handle detaches the thread
        if let Err(e) = thread {
            error!("Failed to start shared worker thread: {}", e);
            let _ = events.send(WorkerEvent::Error(WorkerFault::SpawnFailed {
                reason: format!("failed to start worker thread: {}", e),
            }));
            let _ = events.send(WorkerEvent::Exit(None));
        }

        spawned
    }
}

fn run_worker(entry: Arc<WorkerEntry>, request: SpawnRequest, endpoint: WorkerEndpoint) {
    let worker_id = request.id.clone();
    let events = endpoint.events();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            endpoint.abort(WorkerFault::SpawnFailed {
                reason: format!("failed to build worker runtime: {}", e),
            });
            return;
        }
    };

    let context = WorkerContext::new(request, endpoint);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(entry(context))));
    // Tasks the worker spawned go down with it
    drop(runtime);

    let code = match outcome {
        Ok(Ok(())) => {
            debug!(worker_id = %worker_id, "Shared worker returned");
            0
        }
        Ok(Err(e)) => {
            send_fault(
                &events,
                WorkerFault::Crashed {
                    message: format!("{:#}", e),
                    stack: None,
                },
            );
            1
        }
        Err(payload) => {
            send_fault(
                &events,
                WorkerFault::Panicked {
                    message: panic_message(payload.as_ref()),
                },
            );
            1
        }
    };

    let _ = events.send(WorkerEvent::Exit(Some(code)));
}

fn send_fault(events: &mpsc::UnboundedSender<WorkerEvent>, fault: WorkerFault) {
    let _ = events.send(WorkerEvent::Error(fault));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerRegistry;
    use anyhow::Context;
    use serde_json::json;
    use std::time::Duration;
    use tether_ipc::MessagePort;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn echo_worker(mut context: WorkerContext) -> anyhow::Result<()> {
        context.announce_available()?;

        while let Some(message) = context.next_message().await {
            match message {
                HostMessage::RegisterTestWorker { port, .. } => {
                    tokio::spawn(async move {
                        let mut port = port;
                        while let Some(value) = port.recv().await {
                            if port.post_value(value).is_err() {
                                break;
                            }
                        }
                    });
                }
                HostMessage::DeregisterTestWorker { id } => {
                    context.acknowledge_deregistration(id)?;
                }
            }
        }
        Ok(())
    }

    fn registry(catalog: WorkerCatalog) -> WorkerRegistry {
        WorkerRegistry::with_defaults(Arc::new(ThreadSpawner::new(catalog)))
    }

    #[tokio::test]
    async fn test_thread_worker_round_trip() {
        let mut catalog = WorkerCatalog::new();
        catalog.register("echo", echo_worker);
        let registry = registry(catalog);

        let handle = registry.get_or_create(&ResourceKey::new("echo"), json!(null)).await;
        timeout(WAIT, handle.available()).await.unwrap().unwrap();

        let (mut client, worker_side) = MessagePort::pair();
        let mut messages = handle.subscribe();
        handle
            .post_message(HostMessage::RegisterTestWorker {
                id: "fork-1".to_string(),
                file: "file:///tmp/test.js".to_string(),
                port: worker_side,
            })
            .unwrap();

        client.post_value(json!({"ping": 1})).unwrap();
        assert_eq!(timeout(WAIT, client.recv()).await.unwrap(), Some(json!({"ping": 1})));

        handle
            .post_message(HostMessage::DeregisterTestWorker {
                id: "fork-1".to_string(),
            })
            .unwrap();
        assert_eq!(
            timeout(WAIT, messages.recv()).await.unwrap().unwrap(),
            WorkerMessage::DeregisteredTestWorker {
                id: "fork-1".to_string()
            }
        );
    }

    async fn checks_initial_data(context: WorkerContext) -> anyhow::Result<()> {
        anyhow::ensure!(context.initial_data()["size"] == 3, "unexpected initial data");
        anyhow::ensure!(context.id() == "shared-worker/1", "unexpected id");
        context.announce_available()?;
        Ok(())
    }

    async fn panics(_context: WorkerContext) -> anyhow::Result<()> {
        panic!("worker exploded")
    }

    async fn fails(_context: WorkerContext) -> anyhow::Result<()> {
        let opened: anyhow::Result<()> = Err(anyhow::anyhow!("disk full"));
        opened.context("cannot open cache")
    }

    #[tokio::test]
    async fn test_worker_sees_initial_data() {
        let mut catalog = WorkerCatalog::new();
        catalog.register("config", checks_initial_data);
        let registry = registry(catalog);

        let handle = registry.get_or_create(&ResourceKey::new("config"), json!({"size": 3})).await;
        timeout(WAIT, handle.available()).await.unwrap().unwrap();
        assert_eq!(timeout(WAIT, handle.exited()).await.unwrap(), Some(0));
        assert!(handle.fault().is_none());
    }

    #[tokio::test]
    async fn test_panicking_worker_faults() {
        let mut catalog = WorkerCatalog::new();
        catalog.register("panics", panics);
        let registry = registry(catalog);

        let handle = registry.get_or_create(&ResourceKey::new("panics"), json!(null)).await;
        let fault = timeout(WAIT, handle.available()).await.unwrap().unwrap_err();

        assert_eq!(
            fault,
            WorkerFault::Panicked {
                message: "worker exploded".to_string()
            }
        );
        assert_eq!(timeout(WAIT, handle.exited()).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_failing_worker_reports_error_chain() {
        let mut catalog = WorkerCatalog::new();
        catalog.register("fails", fails);
        let registry = registry(catalog);

        let handle = registry.get_or_create(&ResourceKey::new("fails"), json!(null)).await;
        assert_eq!(
            timeout(WAIT, handle.error()).await.unwrap(),
            WorkerFault::Crashed {
                message: "cannot open cache: disk full".to_string(),
                stack: None
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_key_fails_to_spawn() {
        let registry = registry(WorkerCatalog::new());

        let handle = registry.get_or_create(&ResourceKey::new("missing"), json!(null)).await;
        let fault = timeout(WAIT, handle.available()).await.unwrap().unwrap_err();

        assert!(matches!(fault, WorkerFault::SpawnFailed { .. }));
        assert_eq!(timeout(WAIT, handle.exited()).await.unwrap(), None);
    }
}
