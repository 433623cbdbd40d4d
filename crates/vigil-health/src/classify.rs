//! Outcome classification for individual probe steps.
//!
//! Every step that can fail has two codes: `<Step>Timeout` when a deadline
//! elapsed and `<Step>Error` for anything else. The distinction is kept
//! even when both come from the same call.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use vigil_cluster::ClusterError;

use crate::context::RunContext;
use crate::outcome::Outcome;

/// Recorded by the scheduler when a run had to be pre-empted because it
/// ignored its own deadline.
pub const RUN_TIMEOUT: &str = "RunTimeout";

/// A failure point inside a probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Create,
    Read,
    Delete,
    Poll,
    Resolve,
    Request,
}

impl Step {
    pub fn timeout_code(self) -> &'static str {
        match self {
            Step::Create => "CreateTimeout",
            Step::Read => "ReadTimeout",
            Step::Delete => "DeleteTimeout",
            Step::Poll => "PollTimeout",
            Step::Resolve => "ResolveTimeout",
            Step::Request => "RequestTimeout",
        }
    }

    pub fn error_code(self) -> &'static str {
        match self {
            Step::Create => "CreateError",
            Step::Read => "ReadError",
            Step::Delete => "DeleteError",
            Step::Poll => "PollError",
            Step::Resolve => "ResolveError",
            Step::Request => "RequestError",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Step::Create => "create",
            Step::Read => "read",
            Step::Delete => "delete",
            Step::Poll => "poll",
            Step::Resolve => "resolve",
            Step::Request => "request",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors a step can fail with. Only needs to tell timeouts apart.
pub trait StepFailure: fmt::Display {
    fn is_timeout(&self) -> bool;
}

impl StepFailure for ClusterError {
    fn is_timeout(&self) -> bool {
        ClusterError::is_timeout(self)
    }
}

impl StepFailure for std::io::Error {
    fn is_timeout(&self) -> bool {
        self.kind() == std::io::ErrorKind::TimedOut
    }
}

/// Classify a failed step.
pub fn classify<E: StepFailure + ?Sized>(step: Step, err: &E) -> Outcome {
    if err.is_timeout() {
        Outcome::unhealthy(step.timeout_code(), format!("{step} timed out: {err}"))
    } else {
        Outcome::unhealthy(step.error_code(), format!("{step} failed: {err}"))
    }
}

/// Outcome for a step whose deadline elapsed locally.
pub fn elapsed(step: Step, after: Duration) -> Outcome {
    Outcome::unhealthy(
        step.timeout_code(),
        format!("{step} did not complete within {}ms", after.as_millis()),
    )
}

/// Run one step bounded by `budget` and the run's deadline, whichever is
/// earlier. Failures come back already classified.
pub async fn run_step<T, E, F>(
    step: Step,
    ctx: &RunContext,
    budget: Duration,
    fut: F,
) -> Result<T, Outcome>
where
    E: StepFailure,
    F: Future<Output = Result<T, E>>,
{
    let started = tokio::time::Instant::now();
    match tokio::time::timeout_at(ctx.step_deadline(budget), fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(classify(step, &err)),
        Err(_) => Err(elapsed(step, started.elapsed())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_step_has_distinct_codes() {
        let steps = [
            Step::Create,
            Step::Read,
            Step::Delete,
            Step::Poll,
            Step::Resolve,
            Step::Request,
        ];
        let mut codes = std::collections::HashSet::new();
        for step in steps {
            assert!(step.timeout_code().ends_with("Timeout"));
            assert!(step.error_code().ends_with("Error"));
            assert!(codes.insert(step.timeout_code()));
            assert!(codes.insert(step.error_code()));
        }
    }

    #[test]
    fn classify_separates_timeouts() {
        let timeout = ClusterError::Timeout("server gave up".into());
        assert_eq!(classify(Step::Create, &timeout).code(), Some("CreateTimeout"));

        let forbidden = ClusterError::Rejected {
            status: 403,
            message: "forbidden".into(),
        };
        assert_eq!(classify(Step::Create, &forbidden).code(), Some("CreateError"));

        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "dns");
        assert_eq!(classify(Step::Resolve, &io).code(), Some("ResolveTimeout"));
        let io = std::io::Error::other("nxdomain");
        assert_eq!(classify(Step::Resolve, &io).code(), Some("ResolveError"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_step_times_out_at_budget() {
        let ctx = RunContext::detached(Duration::from_secs(10));
        let result: Result<(), Outcome> = run_step(Step::Read, &ctx, Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ClusterError>(())
        })
        .await;
        assert_eq!(result.unwrap_err().code(), Some("ReadTimeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_step_times_out_at_run_deadline() {
        // Budget is larger than what is left of the run.
        let ctx = RunContext::detached(Duration::from_secs(2));
        let started = tokio::time::Instant::now();
        let result: Result<(), Outcome> = run_step(Step::Poll, &ctx, Duration::from_secs(30), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ClusterError>(())
        })
        .await;
        assert_eq!(result.unwrap_err().code(), Some("PollTimeout"));
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn run_step_passes_values_and_errors() {
        let ctx = RunContext::detached(Duration::from_secs(10));
        let ok = run_step(Step::Read, &ctx, Duration::from_secs(1), async {
            Ok::<_, ClusterError>(42)
        })
        .await;
        assert_eq!(ok, Ok(42));

        let err = run_step(Step::Read, &ctx, Duration::from_secs(1), async {
            Err::<u32, _>(ClusterError::Transport("refused".into()))
        })
        .await;
        assert_eq!(err.unwrap_err().code(), Some("ReadError"));
    }
}
