//! DNS resolution probe.
//!
//! Resolves a configured hostname through the system resolver. Does not
//! touch the cluster API.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use vigil_core::{ConfigResult, ProbeSpec};

use crate::classify::{Step, run_step};
use crate::context::RunContext;
use crate::outcome::Outcome;
use crate::probe::{Probe, ProbeError};

pub const TYPE_ID: &str = "dns";

/// The name resolved but produced no addresses.
pub const NO_RECORDS: &str = "NoRecords";

pub struct DnsProbe {
    name: String,
    hostname: String,
    resolve_timeout: Duration,
}

impl DnsProbe {
    /// Parameters: `hostname` (required), `resolve_timeout`.
    pub fn from_spec(spec: &ProbeSpec) -> ConfigResult<Self> {
        let hostname = spec
            .param_str("hostname")?
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| spec.invalid_param("hostname", "is required"))?;
        Ok(Self {
            name: spec.name.clone(),
            hostname,
            resolve_timeout: super::step_budget(spec, "resolve_timeout")?,
        })
    }
}

#[async_trait]
impl Probe for DnsProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe_type(&self) -> &str {
        TYPE_ID
    }

    async fn run(&self, ctx: RunContext) -> Result<Outcome, ProbeError> {
        let target = format!("{}:0", self.hostname);
        let resolved = run_step(Step::Resolve, &ctx, self.resolve_timeout, async {
            tokio::net::lookup_host(target.as_str())
                .await
                .map(|addrs| addrs.collect::<Vec<_>>())
        })
        .await;

        Ok(match resolved {
            Ok(addrs) if addrs.is_empty() => Outcome::unhealthy(
                NO_RECORDS,
                format!("{} resolved to no addresses", self.hostname),
            ),
            Ok(addrs) => {
                debug!(probe = %self.name, hostname = %self.hostname, count = addrs.len(), "resolved");
                Outcome::Healthy
            }
            Err(outcome) => outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ProbeSpec {
        ProbeSpec::new("dns", TYPE_ID, Duration::from_secs(30), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn literal_address_resolves() {
        let probe = DnsProbe::from_spec(&spec().with_param("hostname", "127.0.0.1")).unwrap();
        let outcome = probe.run(RunContext::detached(Duration::from_secs(5))).await.unwrap();
        assert_eq!(outcome, Outcome::Healthy);
    }

    #[test]
    fn hostname_is_required() {
        let err = DnsProbe::from_spec(&spec()).err().unwrap();
        assert!(err.to_string().contains("hostname"));

        let blank = spec().with_param("hostname", "  ");
        assert!(DnsProbe::from_spec(&blank).is_err());
    }

    #[test]
    fn resolve_timeout_defaults_to_a_third() {
        let probe = DnsProbe::from_spec(&spec().with_param("hostname", "kubernetes.default")).unwrap();
        assert_eq!(probe.resolve_timeout, Duration::from_secs(5) / 3);
    }
}
