//! Built-in probe kinds.
//!
//! | type id        | subject                         | lifecycle |
//! |----------------|---------------------------------|-----------|
//! | `controlplane` | ConfigMap create/read/delete    | yes       |
//! | `pod-startup`  | Pod scheduling and start        | yes       |
//! | `dns`          | name resolution                 | no        |
//! | `metrics-api`  | aggregated metrics API liveness | no        |

pub mod controlplane;
pub mod dns;
pub mod metrics_api;
pub mod pod_startup;

use std::sync::Arc;
use std::time::Duration;

use vigil_cluster::ResourceKind;
use vigil_core::{ConfigResult, ProbeSpec};

use crate::lifecycle::Lifecycle;
use crate::probe::Probe;
use crate::registry::{BuildContext, ProbeRegistry, RegistryError};

pub use controlplane::ControlPlaneProbe;
pub use dns::DnsProbe;
pub use metrics_api::MetricsApiProbe;
pub use pod_startup::PodStartupProbe;

/// Register every built-in probe kind.
pub fn register_builtin(registry: &mut ProbeRegistry) {
    registry.register(controlplane::TYPE_ID, |spec, ctx| {
        Ok(Arc::new(ControlPlaneProbe::from_spec(spec, ctx)?) as Arc<dyn Probe>)
    });
    registry.register(pod_startup::TYPE_ID, |spec, ctx| {
        Ok(Arc::new(PodStartupProbe::from_spec(spec, ctx)?) as Arc<dyn Probe>)
    });
    registry.register(dns::TYPE_ID, |spec, _| {
        Ok(Arc::new(DnsProbe::from_spec(spec)?) as Arc<dyn Probe>)
    });
    registry.register(metrics_api::TYPE_ID, |spec, ctx| {
        Ok(Arc::new(MetricsApiProbe::from_spec(spec, ctx)?) as Arc<dyn Probe>)
    });
}

/// Read a sub-step budget, defaulting to a third of the probe timeout, and
/// check it fits inside the timeout.
pub(crate) fn step_budget(spec: &ProbeSpec, key: &str) -> ConfigResult<Duration> {
    let budget = spec.param_duration(key, spec.timeout / 3)?;
    spec.ensure_within(key, budget)?;
    Ok(budget)
}

/// Lifecycle parameters shared by every probe that creates objects:
/// `quota` (default 1), `stale_after` (default: the probe timeout plus its
/// cleanup grace) and `create_timeout`.
pub(crate) fn lifecycle_from_spec(
    spec: &ProbeSpec,
    ctx: &BuildContext,
    kind: ResourceKind,
) -> Result<Lifecycle, RegistryError> {
    let quota = spec.param_u64("quota", 1)?;
    if quota == 0 {
        return Err(spec.invalid_param("quota", "must be at least 1").into());
    }
    let stale_after = spec.param_duration(
        "stale_after",
        spec.timeout + crate::context::cleanup_grace(spec.timeout),
    )?;
    if stale_after < spec.timeout {
        return Err(spec
            .invalid_param("stale_after", "must not be shorter than the probe timeout")
            .into());
    }
    let create_timeout = step_budget(spec, "create_timeout")?;

    Ok(Lifecycle::new(Arc::clone(&ctx.cluster), &spec.name, kind, &ctx.namespace)
        .with_quota(quota as usize)
        .with_stale_after(stale_after)
        .with_create_timeout(create_timeout))
}

#[cfg(test)]
mod tests {
    use vigil_cluster::InMemoryCluster;

    use super::*;

    fn spec() -> ProbeSpec {
        ProbeSpec::new("p", "controlplane", Duration::from_secs(30), Duration::from_secs(9))
    }

    #[test]
    fn step_budget_defaults_to_a_third() {
        assert_eq!(step_budget(&spec(), "x").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn step_budget_must_fit_in_timeout() {
        let spec = spec().with_param("x", "9s");
        assert!(step_budget(&spec, "x").is_err());
    }

    #[test]
    fn lifecycle_params_are_validated() {
        let ctx = BuildContext::new(Arc::new(InMemoryCluster::new()), "vigil");

        let zero_quota = spec().with_param("quota", 0);
        assert!(lifecycle_from_spec(&zero_quota, &ctx, ResourceKind::ConfigMap).is_err());

        let short_stale = spec().with_param("stale_after", "1s");
        assert!(lifecycle_from_spec(&short_stale, &ctx, ResourceKind::ConfigMap).is_err());

        let ok = lifecycle_from_spec(&spec(), &ctx, ResourceKind::ConfigMap).unwrap();
        assert_eq!(ok.owner(), "p");
    }
}
