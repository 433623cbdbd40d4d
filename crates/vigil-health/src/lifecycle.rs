//! Resource lifecycle: create a disposable object, observe it, delete it.
//!
//! Every run follows the same sequence:
//!
//! 1. garbage-collect owned objects older than `stale_after` (best effort);
//! 2. count owned objects again and refuse to run once `quota` is reached;
//! 3. create the object under `create_timeout`;
//! 4. hand it to the caller's observe step;
//! 5. delete it, whatever the observe step returned.
//!
//! Objects are always created with the owner label and creation annotation
//! set, so anything a run fails to delete is reclaimed by a later GC pass.
//! Shutdown interrupts steps 3 and 4 but never step 5: the delete still runs
//! inside the run, bounded by the hard deadline. If the run is dropped
//! outright (aborted past its hard deadline) or panics between steps 3 and
//! 5, a guard schedules the delete on the runtime.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use vigil_cluster::{ClusterApi, ClusterError, ClusterResult, ManagedResource, ResourceKey, ResourceKind, epoch_millis};

use crate::classify::{Step, run_step};
use crate::context::RunContext;
use crate::outcome::Outcome;
use crate::probe::ProbeError;

/// Per-process sequence mixed into generated object names.
static NAME_SEQ: AtomicU32 = AtomicU32::new(0);

/// What to create. Identity and tags are filled in by [`Lifecycle`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTemplate {
    pub data: BTreeMap<String, String>,
    pub image: Option<String>,
}

/// Result of one garbage-collection pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    /// Owned objects seen by the pass.
    pub examined: usize,
    /// Stale objects removed (or already gone).
    pub deleted: usize,
    /// Stale objects that could not be removed.
    pub failed: Vec<(String, ClusterError)>,
}

impl GcReport {
    /// Deletions issued by the pass.
    pub fn attempted(&self) -> usize {
        self.deleted + self.failed.len()
    }
}

/// Create/observe/delete helper bound to one owner.
#[derive(Clone)]
pub struct Lifecycle {
    cluster: Arc<dyn ClusterApi>,
    owner: String,
    kind: ResourceKind,
    namespace: String,
    quota: usize,
    stale_after: Duration,
    create_timeout: Duration,
}

impl Lifecycle {
    /// Defaults: quota of 1 live object, stale after 60s, 10s to create.
    pub fn new(cluster: Arc<dyn ClusterApi>, owner: &str, kind: ResourceKind, namespace: &str) -> Self {
        Self {
            cluster,
            owner: owner.to_string(),
            kind,
            namespace: namespace.to_string(),
            quota: 1,
            stale_after: Duration::from_secs(60),
            create_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_create_timeout(mut self, create_timeout: Duration) -> Self {
        self.create_timeout = create_timeout;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterApi> {
        &self.cluster
    }

    /// Delete owned objects older than `stale_after`.
    ///
    /// Never fails: a list error yields an empty report, individual delete
    /// errors are collected and logged.
    pub async fn collect_garbage(&self) -> GcReport {
        let mut report = GcReport::default();
        let owned = match self.list_owned().await {
            Ok(owned) => owned,
            Err(e) => {
                warn!(owner = %self.owner, error = %e, "gc: listing owned objects failed");
                return report;
            }
        };
        report.examined = owned.len();

        let now = epoch_millis();
        for resource in owned.iter().filter(|r| r.age(now) > self.stale_after) {
            let key = resource.key();
            match self.cluster.delete(&key).await {
                Ok(()) => report.deleted += 1,
                Err(e) if e.is_not_found() => report.deleted += 1,
                Err(e) => report.failed.push((key.to_string(), e)),
            }
        }

        if report.deleted > 0 {
            info!(owner = %self.owner, deleted = report.deleted, "gc: removed stale objects");
        }
        if !report.failed.is_empty() {
            let errors: Vec<String> = report
                .failed
                .iter()
                .map(|(key, e)| format!("{key}: {e}"))
                .collect();
            warn!(
                owner = %self.owner,
                failed = report.failed.len(),
                errors = %errors.join("; "),
                "gc: stale objects could not be removed"
            );
        }
        report
    }

    /// Number of live owned objects.
    pub async fn live_count(&self) -> ClusterResult<usize> {
        Ok(self.list_owned().await?.len())
    }

    /// Run GC, enforce the quota, create an object from `template`, hand it
    /// to `observe`, then delete it.
    ///
    /// Returns `Err` when the quota count itself could not be taken, or
    /// `ProbeError::Aborted` when shutdown interrupted the run. The delete is
    /// attempted in both cases once the object may exist.
    pub async fn run<F, Fut>(
        &self,
        ctx: &RunContext,
        template: ResourceTemplate,
        observe: F,
    ) -> Result<Outcome, ProbeError>
    where
        F: FnOnce(ManagedResource) -> Fut,
        Fut: Future<Output = Result<Outcome, ProbeError>>,
    {
        if ctx.is_cancelled() {
            return Err(ProbeError::Aborted("shutdown before run".to_string()));
        }
        self.collect_garbage().await;

        let live = self.live_count().await?;
        if live >= self.quota {
            warn!(owner = %self.owner, live, quota = self.quota, "quota exceeded, skipping run");
            return Ok(Outcome::indeterminate(format!(
                "quota exceeded: {live} live objects, quota {}",
                self.quota
            )));
        }

        let resource = self.instantiate(template);
        let key = resource.key();
        let mut guard = CleanupGuard::new(Arc::clone(&self.cluster), key.clone());

        let create = run_step(Step::Create, ctx, self.create_timeout, self.cluster.create(&resource));
        let created = tokio::select! {
            created = create => created,
            _ = ctx.cancelled() => {
                // The request may have landed before it was dropped.
                self.delete(ctx, &key).await;
                guard.disarm();
                return Err(ProbeError::Aborted("shutdown during create".to_string()));
            }
        };
        let created = match created {
            Ok(created) => created,
            Err(outcome) => {
                // The server may still have created it; it is tagged either way.
                if outcome.code() == Some(Step::Create.timeout_code()) {
                    self.delete(ctx, &key).await;
                }
                guard.disarm();
                return Ok(outcome);
            }
        };
        debug!(owner = %self.owner, %key, "object created");

        let result = tokio::select! {
            result = observe(created) => result,
            _ = ctx.cancelled() => {
                debug!(owner = %self.owner, %key, "shutdown during observe, cleaning up");
                Err(ProbeError::Aborted("shutdown during observe".to_string()))
            }
        };

        self.delete(ctx, &key).await;
        guard.disarm();
        result
    }

    async fn list_owned(&self) -> ClusterResult<Vec<ManagedResource>> {
        self.cluster
            .list_owned(self.kind, &self.namespace, &self.owner)
            .await
    }

    /// Delete the run's own object, bounded by the hard deadline. Failures
    /// are logged only; GC picks the object up later.
    async fn delete(&self, ctx: &RunContext, key: &ResourceKey) {
        match tokio::time::timeout_at(ctx.hard_deadline(), self.cluster.delete(key)).await {
            Ok(Ok(())) => debug!(owner = %self.owner, %key, "object deleted"),
            Ok(Err(e)) if e.is_not_found() => {}
            Ok(Err(e)) => warn!(owner = %self.owner, %key, error = %e, "cleanup delete failed"),
            Err(_) => warn!(owner = %self.owner, %key, "cleanup delete timed out"),
        }
    }

    /// Give a template its identity and ownership tags.
    fn instantiate(&self, template: ResourceTemplate) -> ManagedResource {
        let now = epoch_millis();
        let seq = NAME_SEQ.fetch_add(1, Ordering::Relaxed) & 0xff;
        ManagedResource {
            kind: self.kind,
            namespace: self.namespace.clone(),
            name: format!("{}-{now:x}{seq:02x}", self.owner),
            owner: self.owner.clone(),
            created_at_ms: now,
            data: template.data,
            image: template.image,
            phase: None,
        }
    }
}

/// Deletes the object in the background if dropped while still armed.
struct CleanupGuard {
    cluster: Arc<dyn ClusterApi>,
    key: Option<ResourceKey>,
}

impl CleanupGuard {
    fn new(cluster: Arc<dyn ClusterApi>, key: ResourceKey) -> Self {
        Self {
            cluster,
            key: Some(key),
        }
    }

    fn disarm(&mut self) {
        self.key = None;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let cluster = Arc::clone(&self.cluster);
        debug!(%key, "run interrupted, scheduling cleanup");
        handle.spawn(async move {
            match cluster.delete(&key).await {
                Ok(()) => debug!(%key, "interrupted run's object deleted"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(%key, error = %e, "interrupted run's object could not be deleted"),
            }
        });
    }
}
