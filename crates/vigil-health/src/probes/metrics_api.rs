//! Aggregated metrics API probe.
//!
//! Issues a read-only GET against the metrics API and expects a non-empty
//! `items` list. Nothing is created.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use vigil_cluster::ClusterApi;
use vigil_core::ProbeSpec;

use crate::classify::{Step, run_step};
use crate::context::RunContext;
use crate::outcome::Outcome;
use crate::probe::{Probe, ProbeError};
use crate::registry::{BuildContext, RegistryError};

pub const TYPE_ID: &str = "metrics-api";

/// The API answered but returned no items.
pub const EMPTY_ITEMS: &str = "EmptyItems";

pub const DEFAULT_PATH: &str = "/apis/metrics.k8s.io/v1beta1/nodes";

pub struct MetricsApiProbe {
    name: String,
    cluster: Arc<dyn ClusterApi>,
    path: String,
    request_timeout: Duration,
}

impl MetricsApiProbe {
    /// Parameters: `path`, `request_timeout`.
    pub fn from_spec(spec: &ProbeSpec, ctx: &BuildContext) -> Result<Self, RegistryError> {
        let path = spec
            .param_str("path")?
            .unwrap_or_else(|| DEFAULT_PATH.to_string());
        if !path.starts_with('/') {
            return Err(spec.invalid_param("path", "must start with '/'").into());
        }
        Ok(Self {
            name: spec.name.clone(),
            cluster: Arc::clone(&ctx.cluster),
            path,
            request_timeout: super::step_budget(spec, "request_timeout")?,
        })
    }
}

#[async_trait]
impl Probe for MetricsApiProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe_type(&self) -> &str {
        TYPE_ID
    }

    async fn run(&self, ctx: RunContext) -> Result<Outcome, ProbeError> {
        let body = match run_step(
            Step::Request,
            &ctx,
            self.request_timeout,
            self.cluster.get_raw(&self.path),
        )
        .await
        {
            Ok(body) => body,
            Err(outcome) => return Ok(outcome),
        };

        let items = body
            .get("items")
            .and_then(|items| items.as_array())
            .map_or(0, Vec::len);
        if items == 0 {
            return Ok(Outcome::unhealthy(
                EMPTY_ITEMS,
                format!("{} returned no items", self.path),
            ));
        }
        debug!(probe = %self.name, path = %self.path, items, "metrics api answered");
        Ok(Outcome::Healthy)
    }
}
