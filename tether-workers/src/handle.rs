//! Host-side handle of a shared worker
//!
//! A [`WorkerHandle`] exposes three one-shot completions that any number of
//! observers may await: availability, the first fault and exit. They are
//! driven by a single lifecycle monitor task that consumes the worker's event
//! stream, so every observer sees the same outcome in the same order.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tether_ipc::WorkerMessage;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{WorkerError, WorkerFault};
use crate::spawn::{HostMessage, SpawnedWorker, WorkerEvent};
use crate::types::{ReadyState, ResourceKey};

type Completion<T> = Shared<BoxFuture<'static, T>>;

/// Shared view of one running worker
pub struct WorkerHandle {
    key: ResourceKey,
    id: String,
    state: watch::Receiver<ReadyState>,
    fault: Arc<OnceLock<WorkerFault>>,
    available: Completion<Result<(), WorkerFault>>,
    error: Completion<WorkerFault>,
    exit: Completion<Option<i32>>,
    messages: broadcast::Sender<WorkerMessage>,
    outbound: mpsc::UnboundedSender<HostMessage>,
    referenced: watch::Sender<bool>,
    unrefs: AtomicUsize,
}

impl WorkerHandle {
    /// Wrap a spawned worker and start monitoring its events
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn launch(
        key: ResourceKey,
        id: String,
        spawned: SpawnedWorker,
        message_buffer: usize,
    ) -> Arc<Self> {
        let SpawnedWorker { outbound, events } = spawned;

        let (state_tx, state) = watch::channel(ReadyState::Pending);
        let (available_tx, available_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (messages, _) = broadcast::channel(message_buffer.max(1));
        let (referenced, _) = watch::channel(true);
        let fault = Arc::new(OnceLock::new());

        let monitor = LifecycleMonitor {
            worker_id: id.clone(),
            state: state_tx,
            fault: fault.clone(),
            available: Some(available_tx),
            error: Some(error_tx),
            exit: Some(exit_tx),
            messages: messages.clone(),
        };
        tokio::spawn(monitor.run(events));

        let available = async move {
            available_rx.await.unwrap_or_else(|_| {
                Err(WorkerFault::Disconnected {
                    reason: "lifecycle monitor stopped".to_string(),
                })
            })
        }
        .boxed()
        .shared();

        // Never resolves for a worker that does not fault
        let error = async move {
            match error_rx.await {
                Ok(fault) => fault,
                Err(_) => futures::future::pending().await,
            }
        }
        .boxed()
        .shared();

        let exit = async move { exit_rx.await.ok().flatten() }.boxed().shared();

        Arc::new(Self {
            key,
            id,
            state,
            fault,
            available,
            error,
            exit,
            messages,
            outbound,
            referenced,
            unrefs: AtomicUsize::new(0),
        })
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Host-assigned id, `shared-worker/<n>`
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ReadyState {
        *self.state.borrow()
    }

    pub fn is_exited(&self) -> bool {
        self.state() == ReadyState::Exited
    }

    /// The worker's fault, once it has been reported
    pub fn fault(&self) -> Option<WorkerFault> {
        self.fault.get().cloned()
    }

    /// Resolves once the worker is available, or with the fault that
    /// prevented it
    pub async fn available(&self) -> Result<(), WorkerFault> {
        self.available.clone().await
    }

    /// Resolves with the worker's first fault
    pub async fn error(&self) -> WorkerFault {
        self.error.clone().await
    }

    /// Resolves with the exit code once the worker has exited
    pub async fn exited(&self) -> Option<i32> {
        self.exit.clone().await
    }

    /// Receive every protocol message the worker sends from now on
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerMessage> {
        self.messages.subscribe()
    }

    pub fn post_message(&self, message: HostMessage) -> Result<(), WorkerError> {
        self.outbound
            .send(message)
            .map_err(|_| WorkerError::Disconnected {
                worker_id: self.id.clone(),
            })
    }

    /// Stop the worker from keeping the host alive
    ///
    /// Safe to call any number of times.
    pub fn unref(&self) {
        self.unrefs.fetch_add(1, Ordering::SeqCst);
        if self.referenced.send_replace(false) {
            debug!(worker_id = %self.id, "Shared worker no longer keeps the host alive");
        }
    }

    pub fn is_referenced(&self) -> bool {
        *self.referenced.borrow()
    }

    /// How many times `unref` has been called
    pub fn unref_count(&self) -> usize {
        self.unrefs.load(Ordering::SeqCst)
    }

    /// Resolves once the worker no longer keeps the host alive
    pub async fn released(&self) {
        let mut referenced = self.referenced.subscribe();
        tokio::select! {
            _ = referenced.wait_for(|referenced| !*referenced) => {}
            _ = self.exited() => {}
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("state", &self.state())
            .field("referenced", &self.is_referenced())
            .finish()
    }
}

/// Sole writer of a handle's state and completions
///
/// State is always updated before the matching completion fires.
struct LifecycleMonitor {
    worker_id: String,
    state: watch::Sender<ReadyState>,
    fault: Arc<OnceLock<WorkerFault>>,
    available: Option<oneshot::Sender<Result<(), WorkerFault>>>,
    error: Option<oneshot::Sender<WorkerFault>>,
    exit: Option<oneshot::Sender<Option<i32>>>,
    messages: broadcast::Sender<WorkerMessage>,
}

impl LifecycleMonitor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
        let mut code = None;

        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Message(message) => self.on_message(message),
                WorkerEvent::Error(fault) => self.on_fault(fault),
                WorkerEvent::Exit(exit_code) => {
                    code = exit_code;
                    break;
                }
            }
        }

        self.on_exit(code);
    }

    fn on_message(&mut self, message: WorkerMessage) {
        if message == WorkerMessage::Available {
            self.on_available();
        }

        // Nobody subscribed is fine
        let _ = self.messages.send(message);
    }

    fn on_available(&mut self) {
        let Some(available) = self.available.take() else {
            debug!(worker_id = %self.worker_id, "Ignoring late availability signal");
            return;
        };

        self.state.send_replace(ReadyState::Available);
        info!(worker_id = %self.worker_id, "Shared worker available");
        let _ = available.send(Ok(()));
    }

    fn on_fault(&mut self, fault: WorkerFault) {
        let Some(error) = self.error.take() else {
            debug!(worker_id = %self.worker_id, error = %fault, "Ignoring fault after the first");
            return;
        };

        warn!(worker_id = %self.worker_id, error = %fault, "Shared worker faulted");
        let _ = self.fault.set(fault.clone());

        if let Some(available) = self.available.take() {
            self.state.send_replace(ReadyState::Errored);
            let _ = available.send(Err(fault.clone()));
        }

        let _ = error.send(fault);
    }

    fn on_exit(&mut self, code: Option<i32>) {
        // Only an exit that leaves readiness unresolved is a fault
        if self.available.is_some() {
            self.on_fault(WorkerFault::ExitedBeforeReady { code });
        }

        self.state.send_replace(ReadyState::Exited);
        debug!(worker_id = %self.worker_id, ?code, "Shared worker exited");

        if let Some(exit) = self.exit.take() {
            let _ = exit.send(code);
        }
    }
}
