//! In-process cluster backend.
//!
//! Keeps objects in a map and lets callers inject latency and failures per
//! operation. Used for dry runs (`api_server = "memory://"`) and as the fake
//! API server in tests across the workspace.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::api::ClusterApi;
use crate::error::{ClusterError, ClusterResult};
use crate::types::{ManagedResource, ResourceKey, ResourceKind};

/// Injected behaviour. Errors are returned on every call until cleared.
#[derive(Debug, Clone, Default)]
struct Faults {
    create_delay: Option<Duration>,
    create_error: Option<ClusterError>,
    delete_delay: Option<Duration>,
    get_error: Option<ClusterError>,
    delete_error: Option<ClusterError>,
    list_error: Option<ClusterError>,
    /// Pods report `Pending` until this long after creation.
    pod_start_delay: Duration,
    /// Forces the reported pod phase.
    pod_phase: Option<String>,
}

#[derive(Default)]
struct Counters {
    create: AtomicU64,
    get: AtomicU64,
    delete: AtomicU64,
    list: AtomicU64,
}

struct Stored {
    resource: ManagedResource,
    created: Instant,
}

#[derive(Default)]
struct Inner {
    objects: Mutex<BTreeMap<ResourceKey, Stored>>,
    faults: Mutex<Faults>,
    raw: Mutex<HashMap<String, serde_json::Value>>,
    counters: Counters,
}

/// Thread-safe in-memory cluster. Clones share the same objects.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Fault injection ────────────────────────────────────────────

    /// Delay every create by `delay` before the object is stored.
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        lock(&self.inner.faults).create_delay = delay;
    }

    /// Delay every delete by `delay` before the object is removed.
    pub fn set_delete_delay(&self, delay: Option<Duration>) {
        lock(&self.inner.faults).delete_delay = delay;
    }

    pub fn fail_creates(&self, error: Option<ClusterError>) {
        lock(&self.inner.faults).create_error = error;
    }

    pub fn fail_gets(&self, error: Option<ClusterError>) {
        lock(&self.inner.faults).get_error = error;
    }

    pub fn fail_deletes(&self, error: Option<ClusterError>) {
        lock(&self.inner.faults).delete_error = error;
    }

    pub fn fail_lists(&self, error: Option<ClusterError>) {
        lock(&self.inner.faults).list_error = error;
    }

    pub fn set_pod_start_delay(&self, delay: Duration) {
        lock(&self.inner.faults).pod_start_delay = delay;
    }

    pub fn set_pod_phase(&self, phase: Option<&str>) {
        lock(&self.inner.faults).pod_phase = phase.map(str::to_string);
    }

    /// Serve `value` for `get_raw(path)`.
    pub fn set_raw(&self, path: &str, value: serde_json::Value) {
        lock(&self.inner.raw).insert(path.to_string(), value);
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Store an object directly, bypassing faults and call counters.
    pub fn insert(&self, resource: ManagedResource) {
        lock(&self.inner.objects).insert(
            resource.key(),
            Stored {
                resource,
                created: Instant::now(),
            },
        );
    }

    /// Every stored object, in key order.
    pub fn objects(&self) -> Vec<ManagedResource> {
        lock(&self.inner.objects)
            .values()
            .map(|s| s.resource.clone())
            .collect()
    }

    /// Number of stored objects owned by `owner`.
    pub fn owned_count(&self, owner: &str) -> usize {
        lock(&self.inner.objects)
            .values()
            .filter(|s| s.resource.owner == owner)
            .count()
    }

    pub fn create_calls(&self) -> u64 {
        self.inner.counters.create.load(Ordering::Relaxed)
    }

    pub fn get_calls(&self) -> u64 {
        self.inner.counters.get.load(Ordering::Relaxed)
    }

    pub fn delete_calls(&self) -> u64 {
        self.inner.counters.delete.load(Ordering::Relaxed)
    }

    pub fn list_calls(&self) -> u64 {
        self.inner.counters.list.load(Ordering::Relaxed)
    }

    fn faults(&self) -> Faults {
        lock(&self.inner.faults).clone()
    }

    /// Fill in server-side status for a stored object.
    fn observed(stored: &Stored, faults: &Faults) -> ManagedResource {
        let mut resource = stored.resource.clone();
        if resource.kind == ResourceKind::Pod {
            let phase = match &faults.pod_phase {
                Some(phase) => phase.clone(),
                None if stored.created.elapsed() >= faults.pod_start_delay => {
                    "Running".to_string()
                }
                None => "Pending".to_string(),
            };
            resource.phase = Some(phase);
        }
        resource
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn create(&self, resource: &ManagedResource) -> ClusterResult<ManagedResource> {
        self.inner.counters.create.fetch_add(1, Ordering::Relaxed);
        let faults = self.faults();
        if let Some(delay) = faults.create_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &faults.create_error {
            return Err(err.clone());
        }

        let key = resource.key();
        let mut objects = lock(&self.inner.objects);
        if objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(key.to_string()));
        }
        let mut stored = resource.clone();
        stored.phase = None;
        let stored = Stored {
            resource: stored,
            created: Instant::now(),
        };
        let observed = Self::observed(&stored, &faults);
        objects.insert(key.clone(), stored);
        debug!(%key, "object created");
        Ok(observed)
    }

    async fn get(&self, key: &ResourceKey) -> ClusterResult<ManagedResource> {
        self.inner.counters.get.fetch_add(1, Ordering::Relaxed);
        let faults = self.faults();
        if let Some(err) = faults.get_error.clone() {
            return Err(err);
        }
        lock(&self.inner.objects)
            .get(key)
            .map(|stored| Self::observed(stored, &faults))
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &ResourceKey) -> ClusterResult<()> {
        self.inner.counters.delete.fetch_add(1, Ordering::Relaxed);
        let faults = self.faults();
        if let Some(delay) = faults.delete_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = faults.delete_error {
            return Err(err);
        }
        match lock(&self.inner.objects).remove(key) {
            Some(_) => {
                debug!(%key, "object deleted");
                Ok(())
            }
            None => Err(ClusterError::NotFound(key.to_string())),
        }
    }

    async fn list_owned(
        &self,
        kind: ResourceKind,
        namespace: &str,
        owner: &str,
    ) -> ClusterResult<Vec<ManagedResource>> {
        self.inner.counters.list.fetch_add(1, Ordering::Relaxed);
        let faults = self.faults();
        if let Some(err) = faults.list_error.clone() {
            return Err(err);
        }
        Ok(lock(&self.inner.objects)
            .values()
            .filter(|s| {
                s.resource.kind == kind
                    && s.resource.namespace == namespace
                    && s.resource.owner == owner
            })
            .map(|s| Self::observed(s, &faults))
            .collect())
    }

    async fn get_raw(&self, path: &str) -> ClusterResult<serde_json::Value> {
        self.inner.counters.get.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = self.faults().get_error {
            return Err(err);
        }
        lock(&self.inner.raw)
            .get(path)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(path.to_string()))
    }
}
