//! The probe contract.

use async_trait::async_trait;
use thiserror::Error;

use vigil_cluster::ClusterError;

use crate::context::RunContext;
use crate::outcome::Outcome;

/// Invocation-level failures: the probe could not get as far as testing
/// its subject. Recorded as "unknown", never as unhealthy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("cluster api: {0}")]
    Cluster(#[from] ClusterError),

    #[error("probe panicked: {0}")]
    Panicked(String),

    #[error("probe run aborted: {0}")]
    Aborted(String),
}

/// A named, typed health check.
///
/// `run` must honour `ctx`: every remote call is bounded by the run's
/// deadline. The scheduler aborts runs that overstay their hard deadline
/// and records them as timed out.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    /// Unique name of this probe instance.
    fn name(&self) -> &str;

    /// Type identifier the probe was registered under.
    fn probe_type(&self) -> &str;

    async fn run(&self, ctx: RunContext) -> Result<Outcome, ProbeError>;
}
