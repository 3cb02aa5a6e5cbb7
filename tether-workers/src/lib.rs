//! Shared worker coordination for tether
//!
//! Long-lived background workers are launched lazily, one per resource key,
//! and shared by every client session that asks for that key. This crate
//! provides:
//!
//! - [`WorkerRegistry`]: get-or-create of one [`WorkerHandle`] per key
//! - [`WorkerHandle`]: readiness, fault and exit completions of a worker
//! - [`AttachmentCoordinator`] and [`observe_worker_process`]: the
//!   register/deregister protocol between client sessions and workers
//! - [`RegistrationCounter`]: when a session may be considered deregistered
//! - [`ThreadSpawner`] and [`ProcessSpawner`]: in-process and child process
//!   worker implementations behind the [`WorkerSpawner`] boundary

pub mod coordinator;
pub mod error;
pub mod handle;
pub mod process;
pub mod registration;
pub mod registry;
pub mod session;
pub mod spawn;
pub mod status;
pub mod thread;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export main types
pub use coordinator::{observe_worker_process, AttachmentCoordinator};
pub use error::{WorkerError, WorkerFault};
pub use handle::WorkerHandle;
pub use process::ProcessSpawner;
pub use registration::{Deregistration, RegistrationCounter};
pub use registry::{WorkerRegistry, WorkerStats};
pub use session::{
    ClientSession, CompletionTrigger, ConnectRequest, FatalErrorSignal, Fork,
    SharedWorkerConnection, SharedWorkerConnector, TaskCompletion,
};
pub use spawn::{worker_link, HostMessage, SpawnRequest, SpawnedWorker, WorkerEndpoint, WorkerEvent, WorkerSpawner};
pub use status::{RunStatus, StatusEvent};
pub use thread::{ThreadSpawner, WorkerCatalog, WorkerContext};
pub use types::{ReadyState, ResourceKey};

// Re-export protocol types used in this crate's public API
pub use tether_ipc::{ClientMessage, MessagePort, WorkerMessage};
