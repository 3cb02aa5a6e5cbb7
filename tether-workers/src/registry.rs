//! Registry of shared workers keyed by resource
//!
//! At most one worker is launched per resource key for the lifetime of the
//! registry. Lookups and launches happen under one write lock, so concurrent
//! callers asking for the same key observe the same handle.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tether_config::SharedWorkerConfig;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::handle::WorkerHandle;
use crate::spawn::{SpawnRequest, WorkerSpawner};
use crate::types::{ReadyState, ResourceKey};

/// Snapshot of one registered worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStats {
    pub key: ResourceKey,
    pub id: String,
    pub state: ReadyState,
    pub referenced: bool,
}

/// Get-or-create registry of shared workers
pub struct WorkerRegistry {
    spawner: Arc<dyn WorkerSpawner>,
    config: SharedWorkerConfig,
    workers: RwLock<HashMap<ResourceKey, Arc<WorkerHandle>>>,
    launched: AtomicU64,
}

impl WorkerRegistry {
    pub fn new(spawner: Arc<dyn WorkerSpawner>, config: SharedWorkerConfig) -> Self {
        Self {
            spawner,
            config,
            workers: RwLock::new(HashMap::new()),
            launched: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self::new(spawner, SharedWorkerConfig::default())
    }

    pub fn config(&self) -> &SharedWorkerConfig {
        &self.config
    }

    /// Return the worker for `key`, launching it on first use
    ///
    /// `initial_data` only reaches the worker when this call launches it.
    /// A worker that has exited stays registered and is returned as is.
    pub async fn get_or_create(
        &self,
        key: &ResourceKey,
        initial_data: JsonValue,
    ) -> Arc<WorkerHandle> {
        let mut workers = self.workers.write().await;

        if let Some(handle) = workers.get(key) {
            if handle.is_exited() {
                debug!(worker_id = %handle.id(), key = %key, "Returning exited shared worker");
            }
            return handle.clone();
        }

        let id = format!(
            "shared-worker/{}",
            self.launched.fetch_add(1, Ordering::SeqCst) + 1
        );
        info!(worker_id = %id, key = %key, "Launching shared worker");

        let spawned = self.spawner.spawn(SpawnRequest {
            key: key.clone(),
            id: id.clone(),
            initial_data,
            exec_flags: self.config.exec_flags.clone(),
        });
        let handle = WorkerHandle::launch(key.clone(), id, spawned, self.config.message_buffer);

        workers.insert(key.clone(), handle.clone());
        handle
    }

    pub async fn get(&self, key: &ResourceKey) -> Option<Arc<WorkerHandle>> {
        self.workers.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    /// Number of workers launched so far
    pub fn launched_count(&self) -> u64 {
        self.launched.load(Ordering::SeqCst)
    }

    /// Snapshot of every registered worker, ordered by key
    pub async fn worker_stats(&self) -> Vec<WorkerStats> {
        let workers = self.workers.read().await;
        let mut stats: Vec<WorkerStats> = workers
            .values()
            .map(|handle| WorkerStats {
                key: handle.key().clone(),
                id: handle.id().to_string(),
                state: handle.state(),
                referenced: handle.is_referenced(),
            })
            .collect();

        stats.sort_by(|a, b| a.key.cmp(&b.key));
        stats
    }

    /// Wait until no registered worker keeps the host alive
    pub async fn wait_for_referenced(&self) {
        let handles: Vec<Arc<WorkerHandle>> = self.workers.read().await.values().cloned().collect();
        futures::future::join_all(handles.iter().map(|handle| handle.released())).await;
    }
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("config", &self.config)
            .field("launched", &self.launched_count())
            .finish_non_exhaustive()
    }
}
