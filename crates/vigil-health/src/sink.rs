//! Where classified results go.

use async_trait::async_trait;

use crate::outcome::Outcome;
use crate::probe::ProbeError;

/// Receives exactly one record per probe invocation.
///
/// `Err` means the invocation itself failed and the sink must treat the
/// result as unknown, distinct from a classified `Unhealthy`.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(
        &self,
        probe_type: &str,
        probe_name: &str,
        result: Result<&Outcome, &ProbeError>,
    );
}
