//! Attaching client sessions to shared workers
//!
//! For every connect request of a session the coordinator launches or reuses
//! the worker, waits for it to become available, registers the session with
//! it and later deregisters it once the session's task has finished. A worker
//! fault at any point releases the session immediately.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tether_ipc::{ClientMessage, MessagePort, WorkerMessage};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::WorkerFault;
use crate::handle::WorkerHandle;
use crate::registration::{Deregistration, RegistrationCounter};
use crate::registry::WorkerRegistry;
use crate::session::{ClientSession, ConnectRequest, FatalErrorSignal, Fork};
use crate::spawn::HostMessage;
use crate::status::{RunStatus, StatusEvent};

/// Start serving the connect requests of `fork`
///
/// The returned [`Deregistration`] fires once the session's task has finished
/// and every worker it registered with has acknowledged, or as soon as one of
/// those workers faults.
pub fn observe_worker_process(
    registry: Arc<WorkerRegistry>,
    fork: Fork,
    run_status: RunStatus,
) -> Deregistration {
    let (session, mut connections) = fork.into_parts();
    let counter = Arc::new(RegistrationCounter::new());

    let completion = session.completion().clone();
    let on_completion = counter.clone();
    tokio::spawn(async move {
        completion.wait().await;
        on_completion.complete_task();
    });

    let coordinator = Arc::new(AttachmentCoordinator::new(
        registry,
        session,
        counter.clone(),
        run_status,
    ));
    tokio::spawn(async move {
        while let Some(request) = connections.recv().await {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let key = request.resource_key.clone();
                if let Err(fault) = coordinator.attach(request).await {
                    debug!(
                        fork_id = %coordinator.session().fork_id(),
                        resource_key = %key,
                        error = %fault,
                        "Abandoned shared worker attachment"
                    );
                }
            });
        }
    });

    Deregistration::new(counter)
}

/// Registers one session's connect requests with their workers
#[derive(Debug)]
pub struct AttachmentCoordinator {
    registry: Arc<WorkerRegistry>,
    session: ClientSession,
    counter: Arc<RegistrationCounter>,
    run_status: RunStatus,
}

impl AttachmentCoordinator {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        session: ClientSession,
        counter: Arc<RegistrationCounter>,
        run_status: RunStatus,
    ) -> Self {
        Self {
            registry,
            session,
            counter,
            run_status,
        }
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn counter(&self) -> &Arc<RegistrationCounter> {
        &self.counter
    }

    /// Attach one connect request to its worker
    ///
    /// Returns the worker's fault when the session could not be registered.
    /// The worker is unreferenced whatever the outcome.
    pub async fn attach(&self, request: ConnectRequest) -> Result<(), WorkerFault> {
        let ConnectRequest {
            resource_key,
            initial_data,
            port,
            on_fatal_error,
        } = request;

        let handle = self.registry.get_or_create(&resource_key, initial_data).await;
        let listener = Arc::new(ListenerSlot::default());

        self.watch_for_fault(handle.clone(), listener.clone(), on_fatal_error);
        let outcome = self.register(&handle, port, &listener).await;

        handle.unref();
        outcome
    }

    fn watch_for_fault(
        &self,
        handle: Arc<WorkerHandle>,
        listener: Arc<ListenerSlot>,
        on_fatal_error: FatalErrorSignal,
    ) {
        let counter = self.counter.clone();
        let run_status = self.run_status.clone();
        let fork_id = self.session.fork_id().to_string();

        tokio::spawn(async move {
            let fault = handle.error().await;

            counter.mark_deregistered();
            listener.remove();

            warn!(
                fork_id = %fork_id,
                worker_id = %handle.id(),
                error = %fault,
                "Shared worker failed, releasing session"
            );
            run_status.emit_state_change(StatusEvent::shared_worker_error(&fault));
            on_fatal_error.signal(fault);
        });
    }

    async fn register(
        &self,
        handle: &Arc<WorkerHandle>,
        port: MessagePort,
        listener: &ListenerSlot,
    ) -> Result<(), WorkerFault> {
        handle.available().await?;

        if let Some(fault) = handle.fault() {
            debug!(worker_id = %handle.id(), "Shared worker faulted before registration");
            return Err(fault);
        }

        let fork_id = self.session.fork_id().to_string();

        if let Err(e) = port.post_message(&ClientMessage::Ready) {
            debug!(fork_id = %fork_id, "Client port closed before ready: {}", e);
        }

        // Subscribe before registering so the acknowledgement cannot be missed
        let messages = handle.subscribe();
        let registration = HostMessage::RegisterTestWorker {
            id: fork_id.clone(),
            file: self.session.file_url(),
            port,
        };
        self.counter.increment();
        if let Err(e) = handle.post_message(registration) {
            warn!(fork_id = %fork_id, "Failed to register session: {}", e);
            self.counter.decrement();
            return Err(handle.fault().unwrap_or_else(|| WorkerFault::Disconnected {
                reason: e.to_string(),
            }));
        }
        info!(fork_id = %fork_id, worker_id = %handle.id(), "Session registered with shared worker");

        let completion = self.session.completion().clone();
        let worker = handle.clone();
        let deregister_id = fork_id.clone();
        tokio::spawn(async move {
            completion.wait().await;
            if let Err(e) = worker.post_message(HostMessage::DeregisterTestWorker { id: deregister_id }) {
                debug!("Skipping deregistration: {}", e);
            }
        });

        let acknowledgements = tokio::spawn(await_acknowledgement(
            handle.clone(),
            messages,
            fork_id,
            self.counter.clone(),
        ));
        listener.install(acknowledgements.abort_handle());

        Ok(())
    }
}

/// Wait for the worker to acknowledge one deregistration
///
/// A worker that exits without acknowledging releases the registration.
async fn await_acknowledgement(
    handle: Arc<WorkerHandle>,
    mut messages: broadcast::Receiver<WorkerMessage>,
    fork_id: String,
    counter: Arc<RegistrationCounter>,
) {
    loop {
        let received = tokio::select! {
            biased;
            received = messages.recv() => received,
            code = handle.exited() => {
                let remaining = counter.decrement();
                info!(fork_id = %fork_id, ?code, remaining, "Shared worker exited, releasing registration");
                break;
            }
        };

        match received {
            Ok(WorkerMessage::DeregisteredTestWorker { id }) if id == fork_id => {
                let remaining = counter.decrement();
                debug!(fork_id = %fork_id, remaining, "Shared worker acknowledged deregistration");
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(fork_id = %fork_id, skipped, "Missed shared worker messages");
            }
            Err(RecvError::Closed) => {
                counter.decrement();
                break;
            }
        }
    }
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Empty,
    Installed(AbortHandle),
    Removed,
}

/// Holds the acknowledgement listener of one attachment
///
/// A listener installed after removal is aborted straight away.
#[derive(Debug, Default)]
struct ListenerSlot {
    state: Mutex<SlotState>,
}

impl ListenerSlot {
    fn install(&self, listener: AbortHandle) {
        let mut state = self.lock();
        match *state {
            SlotState::Removed => listener.abort(),
            _ => *state = SlotState::Installed(listener),
        }
    }

    fn remove(&self) {
        let previous = std::mem::replace(&mut *self.lock(), SlotState::Removed);
        if let SlotState::Installed(listener) = previous {
            listener.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
