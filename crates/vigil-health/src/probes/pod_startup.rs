//! Pod-startup probe: create a pause pod and wait for it to run.
//!
//! Covers admission, scheduling, image pull and kubelet start in one
//! measurement. The pod is deleted whatever the outcome.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use vigil_cluster::{ClusterError, DEFAULT_POD_IMAGE, ManagedResource, ResourceKey, ResourceKind};
use vigil_core::ProbeSpec;

use crate::classify::{Step, run_step};
use crate::context::RunContext;
use crate::lifecycle::{Lifecycle, ResourceTemplate};
use crate::outcome::Outcome;
use crate::probe::{Probe, ProbeError};
use crate::registry::{BuildContext, RegistryError};

pub const TYPE_ID: &str = "pod-startup";

/// The pod reached a terminal phase without ever running.
pub const POD_FAILED: &str = "PodFailed";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct PodStartupProbe {
    name: String,
    lifecycle: Lifecycle,
    image: String,
    startup_timeout: Duration,
    poll_interval: Duration,
}

impl PodStartupProbe {
    /// Parameters: `image`, `startup_timeout` (default half the timeout),
    /// `poll_interval` plus the shared lifecycle parameters.
    pub fn from_spec(spec: &ProbeSpec, ctx: &BuildContext) -> Result<Self, RegistryError> {
        let startup_timeout = spec.param_duration("startup_timeout", spec.timeout / 2)?;
        spec.ensure_within("startup_timeout", startup_timeout)?;
        let poll_interval = spec.param_duration("poll_interval", DEFAULT_POLL_INTERVAL)?;
        if poll_interval >= startup_timeout {
            return Err(spec
                .invalid_param("poll_interval", "must be shorter than startup_timeout")
                .into());
        }

        Ok(Self {
            name: spec.name.clone(),
            lifecycle: super::lifecycle_from_spec(spec, ctx, ResourceKind::Pod)?,
            image: spec
                .param_str("image")?
                .unwrap_or_else(|| DEFAULT_POD_IMAGE.to_string()),
            startup_timeout,
            poll_interval,
        })
    }

    /// Poll until the pod runs. `Ok(Some(phase))` means it ended in a
    /// terminal phase instead.
    async fn wait_running(&self, key: &ResourceKey) -> Result<Option<String>, ClusterError> {
        let cluster = self.lifecycle.cluster();
        let mut polls = 0u32;
        loop {
            let pod = cluster.get(key).await?;
            polls += 1;
            match pod.phase.as_deref() {
                Some("Running") => {
                    debug!(probe = %self.name, %key, polls, "pod running");
                    return Ok(None);
                }
                Some(phase @ ("Failed" | "Succeeded")) => return Ok(Some(phase.to_string())),
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn observe(&self, ctx: &RunContext, created: ManagedResource) -> Outcome {
        let key = created.key();
        match run_step(Step::Poll, ctx, self.startup_timeout, self.wait_running(&key)).await {
            Ok(None) => Outcome::Healthy,
            Ok(Some(phase)) => {
                Outcome::unhealthy(POD_FAILED, format!("{key} reached phase {phase} before running"))
            }
            Err(outcome) => outcome,
        }
    }
}

#[async_trait]
impl Probe for PodStartupProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe_type(&self) -> &str {
        TYPE_ID
    }

    async fn run(&self, ctx: RunContext) -> Result<Outcome, ProbeError> {
        let template = ResourceTemplate {
            image: Some(self.image.clone()),
            ..ResourceTemplate::default()
        };
        let ctx = &ctx;
        self.lifecycle
            .run(ctx, template, |created| async move {
                Ok(self.observe(ctx, created).await)
            })
            .await
    }
}
