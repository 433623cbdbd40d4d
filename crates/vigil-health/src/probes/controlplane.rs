//! Control-plane CRUD probe.
//!
//! Creates a ConfigMap carrying a nonce, reads it back, compares the
//! payload and deletes it. Exercises the API server's write and read path
//! and its backing store end to end.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use vigil_cluster::{ManagedResource, ResourceKind, epoch_millis};
use vigil_core::ProbeSpec;

use crate::classify::{Step, run_step};
use crate::context::RunContext;
use crate::lifecycle::{Lifecycle, ResourceTemplate};
use crate::outcome::Outcome;
use crate::probe::{Probe, ProbeError};
use crate::registry::{BuildContext, RegistryError};

pub const TYPE_ID: &str = "controlplane";

/// The object disappeared between create and read.
pub const READ_MISSING: &str = "ReadMissing";
/// The object read back does not carry what was written.
pub const READ_MISMATCH: &str = "ReadMismatch";

const PAYLOAD_KEY: &str = "nonce";

pub struct ControlPlaneProbe {
    name: String,
    lifecycle: Lifecycle,
    read_timeout: Duration,
}

impl ControlPlaneProbe {
    /// Parameters: `read_timeout` plus the shared lifecycle parameters.
    pub fn from_spec(spec: &ProbeSpec, ctx: &BuildContext) -> Result<Self, RegistryError> {
        Ok(Self {
            name: spec.name.clone(),
            lifecycle: super::lifecycle_from_spec(spec, ctx, ResourceKind::ConfigMap)?,
            read_timeout: super::step_budget(spec, "read_timeout")?,
        })
    }

    async fn observe(&self, ctx: &RunContext, created: ManagedResource) -> Outcome {
        let key = created.key();
        let cluster = self.lifecycle.cluster();
        let read = run_step(Step::Read, ctx, self.read_timeout, async {
            match cluster.get(&key).await {
                Ok(found) => Ok(Some(found)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await;

        match read {
            Err(outcome) => outcome,
            Ok(None) => Outcome::unhealthy(READ_MISSING, format!("{key} vanished after create")),
            Ok(Some(found)) if found.data != created.data => Outcome::unhealthy(
                READ_MISMATCH,
                format!("{key} read back with different data"),
            ),
            Ok(Some(_)) => Outcome::Healthy,
        }
    }
}

#[async_trait]
impl Probe for ControlPlaneProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe_type(&self) -> &str {
        TYPE_ID
    }

    async fn run(&self, ctx: RunContext) -> Result<Outcome, ProbeError> {
        let nonce = format!("{:x}", epoch_millis());
        debug!(probe = %self.name, %nonce, "writing configmap");
        let template = ResourceTemplate {
            data: BTreeMap::from([(PAYLOAD_KEY.to_string(), nonce)]),
            image: None,
        };
        let ctx = &ctx;
        self.lifecycle
            .run(ctx, template, |created| async move {
                Ok(self.observe(ctx, created).await)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vigil_cluster::{ClusterError, InMemoryCluster};

    use super::*;

    fn probe(cluster: &InMemoryCluster) -> ControlPlaneProbe {
        let spec = ProbeSpec::new("crud", TYPE_ID, Duration::from_secs(30), Duration::from_secs(6))
            .with_param("quota", 2);
        let ctx = BuildContext::new(Arc::new(cluster.clone()), "vigil");
        ControlPlaneProbe::from_spec(&spec, &ctx).unwrap()
    }

    #[tokio::test]
    async fn healthy_round_trip() {
        let cluster = InMemoryCluster::new();
        let probe = probe(&cluster);

        let outcome = probe.run(RunContext::detached(Duration::from_secs(6))).await.unwrap();
        assert_eq!(outcome, Outcome::Healthy);
        assert_eq!(cluster.create_calls(), 1);
        assert_eq!(cluster.delete_calls(), 1);
        assert!(cluster.objects().is_empty());
    }

    #[tokio::test]
    async fn read_error_is_classified_and_cleaned_up() {
        let cluster = InMemoryCluster::new();
        cluster.fail_gets(Some(ClusterError::Rejected {
            status: 500,
            message: "etcdserver: leader changed".into(),
        }));
        let probe = probe(&cluster);

        let outcome = probe.run(RunContext::detached(Duration::from_secs(6))).await.unwrap();
        assert_eq!(outcome.code(), Some("ReadError"));
        assert_eq!(cluster.delete_calls(), 1);
        assert!(cluster.objects().is_empty());
    }

    #[tokio::test]
    async fn read_timeout_from_server_is_timeout_code() {
        let cluster = InMemoryCluster::new();
        cluster.fail_gets(Some(ClusterError::Timeout("etcd request timed out".into())));
        let probe = probe(&cluster);

        let outcome = probe.run(RunContext::detached(Duration::from_secs(6))).await.unwrap();
        assert_eq!(outcome.code(), Some("ReadTimeout"));
    }

    #[tokio::test]
    async fn missing_object_is_reported() {
        let cluster = InMemoryCluster::new();
        cluster.fail_gets(Some(ClusterError::NotFound("gone".into())));
        let probe = probe(&cluster);

        let outcome = probe.run(RunContext::detached(Duration::from_secs(6))).await.unwrap();
        assert_eq!(outcome.code(), Some(READ_MISSING));
    }

    #[tokio::test]
    async fn create_rejection_is_create_error() {
        let cluster = InMemoryCluster::new();
        cluster.fail_creates(Some(ClusterError::Rejected {
            status: 403,
            message: "configmaps is forbidden".into(),
        }));
        let probe = probe(&cluster);

        let outcome = probe.run(RunContext::detached(Duration::from_secs(6))).await.unwrap();
        assert_eq!(outcome.code(), Some("CreateError"));
    }

    #[test]
    fn read_timeout_must_fit_in_timeout() {
        let spec = ProbeSpec::new("crud", TYPE_ID, Duration::from_secs(30), Duration::from_secs(6))
            .with_param("read_timeout", "10s");
        let ctx = BuildContext::new(Arc::new(InMemoryCluster::new()), "vigil");
        assert!(matches!(
            ControlPlaneProbe::from_spec(&spec, &ctx),
            Err(RegistryError::Config(_))
        ));
    }
}
