//! Test support: a spawner whose workers are driven by hand

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::spawn::{worker_link, SpawnRequest, SpawnedWorker, WorkerEndpoint, WorkerSpawner};
use crate::types::ResourceKey;

/// Records every spawn request and keeps the worker side of each link
#[derive(Debug, Default)]
pub struct ScriptedSpawner {
    requests: Mutex<Vec<SpawnRequest>>,
    endpoints: Mutex<HashMap<ResourceKey, WorkerEndpoint>>,
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        lock(&self.requests).clone()
    }

    /// Take the worker side of the link spawned for `key`
    pub fn take_endpoint(&self, key: &ResourceKey) -> Option<WorkerEndpoint> {
        lock(&self.endpoints).remove(key)
    }
}

impl WorkerSpawner for ScriptedSpawner {
    fn spawn(&self, request: SpawnRequest) -> SpawnedWorker {
        let (spawned, endpoint) = worker_link();
        lock(&self.endpoints).insert(request.key.clone(), endpoint);
        lock(&self.requests).push(request);
        spawned
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
