//! Metrics collector: per-probe run counters and last result.
//!
//! Counters are atomics; the per-code breakdown and the last result sit
//! behind a mutex each. One bucket per `(type, name)`, created on first
//! record or up front by [`MetricsCollector::register`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use vigil_health::{Outcome, ProbeError, ResultSink};

/// How one run ended, as counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RunResult {
    Healthy,
    Unhealthy,
    Indeterminate,
    /// The invocation itself failed; the subject's health is unknown.
    Error,
}

impl RunResult {
    pub const ALL: [RunResult; 4] = [
        RunResult::Healthy,
        RunResult::Unhealthy,
        RunResult::Indeterminate,
        RunResult::Error,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RunResult::Healthy => "healthy",
            RunResult::Unhealthy => "unhealthy",
            RunResult::Indeterminate => "indeterminate",
            RunResult::Error => "error",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Last recorded run.
#[derive(Debug, Clone, Copy)]
struct LastRun {
    result: RunResult,
    at_secs: f64,
}

/// Per-probe metrics bucket.
#[derive(Default)]
struct ProbeMetrics {
    /// Runs per [`RunResult`], indexed by `RunResult::index`.
    runs: [AtomicU64; 4],
    /// Unhealthy runs per code.
    unhealthy_codes: Mutex<BTreeMap<&'static str, u64>>,
    last: Mutex<Option<LastRun>>,
}

/// Point-in-time view of one probe, ready for exposition.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSnapshot {
    pub probe_type: String,
    pub probe_name: String,
    /// Run counts, in [`RunResult::ALL`] order.
    pub runs: Vec<(RunResult, u64)>,
    pub unhealthy_codes: BTreeMap<&'static str, u64>,
    /// `Some(true)` healthy, `Some(false)` unhealthy, `None` when the last
    /// run did not reach a verdict or nothing ran yet.
    pub up: Option<bool>,
    pub last_run_epoch_secs: Option<f64>,
}

impl ProbeSnapshot {
    pub fn run_count(&self, result: RunResult) -> u64 {
        self.runs
            .iter()
            .find(|(r, _)| *r == result)
            .map_or(0, |(_, n)| *n)
    }
}

type ProbeKey = (String, String);

/// Collects results for every probe. Plugged into the scheduler as its
/// [`ResultSink`].
#[derive(Default)]
pub struct MetricsCollector {
    /// Per-probe metrics: (type, name) → metrics.
    probes: Arc<RwLock<HashMap<ProbeKey, Arc<ProbeMetrics>>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a probe's bucket before its first run so it shows up in the
    /// exposition immediately.
    pub async fn register(&self, probe_type: &str, probe_name: &str) {
        self.bucket(probe_type, probe_name).await;
        debug!(probe = %probe_name, %probe_type, "registered for metrics collection");
    }

    async fn bucket(&self, probe_type: &str, probe_name: &str) -> Arc<ProbeMetrics> {
        let key = (probe_type.to_string(), probe_name.to_string());
        if let Some(m) = self.probes.read().await.get(&key) {
            return Arc::clone(m);
        }
        let mut probes = self.probes.write().await;
        Arc::clone(probes.entry(key).or_default())
    }

    /// Count one run and remember it as the latest.
    pub async fn observe(&self, probe_type: &str, probe_name: &str, result: Result<&Outcome, &ProbeError>) {
        let run_result = match result {
            Ok(Outcome::Healthy) => RunResult::Healthy,
            Ok(Outcome::Unhealthy { .. }) => RunResult::Unhealthy,
            Ok(Outcome::Indeterminate { .. }) => RunResult::Indeterminate,
            Err(_) => RunResult::Error,
        };

        let m = self.bucket(probe_type, probe_name).await;
        m.runs[run_result.index()].fetch_add(1, Ordering::Relaxed);
        if let Ok(Outcome::Unhealthy { code, .. }) = result {
            *m.unhealthy_codes.lock().await.entry(*code).or_default() += 1;
        }
        *m.last.lock().await = Some(LastRun {
            result: run_result,
            at_secs: epoch_secs_f64(),
        });
    }

    /// Current state of every known probe, sorted by name then type.
    pub async fn snapshot(&self) -> Vec<ProbeSnapshot> {
        let probes = self.probes.read().await;
        let mut snapshots = Vec::with_capacity(probes.len());

        for ((probe_type, probe_name), m) in probes.iter() {
            let last = *m.last.lock().await;
            snapshots.push(ProbeSnapshot {
                probe_type: probe_type.clone(),
                probe_name: probe_name.clone(),
                runs: RunResult::ALL
                    .iter()
                    .map(|r| (*r, m.runs[r.index()].load(Ordering::Relaxed)))
                    .collect(),
                unhealthy_codes: m.unhealthy_codes.lock().await.clone(),
                up: last.and_then(|l| match l.result {
                    RunResult::Healthy => Some(true),
                    RunResult::Unhealthy => Some(false),
                    RunResult::Indeterminate | RunResult::Error => None,
                }),
                last_run_epoch_secs: last.map(|l| l.at_secs),
            });
        }

        snapshots.sort_by(|a, b| {
            (a.probe_name.as_str(), a.probe_type.as_str())
                .cmp(&(b.probe_name.as_str(), b.probe_type.as_str()))
        });
        snapshots
    }

    /// Names of every known probe.
    pub async fn registered_probes(&self) -> Vec<String> {
        let probes = self.probes.read().await;
        let mut names: Vec<String> = probes.keys().map(|(_, name)| name.clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ResultSink for MetricsCollector {
    async fn record(&self, probe_type: &str, probe_name: &str, result: Result<&Outcome, &ProbeError>) {
        match result {
            Ok(Outcome::Healthy) => debug!(probe = %probe_name, %probe_type, "healthy"),
            Ok(Outcome::Unhealthy { code, message }) => {
                warn!(probe = %probe_name, %probe_type, %code, %message, "unhealthy")
            }
            Ok(Outcome::Indeterminate { cause }) => {
                info!(probe = %probe_name, %probe_type, %cause, "indeterminate")
            }
            Err(e) => error!(probe = %probe_name, %probe_type, error = %e, "probe invocation failed"),
        }
        self.observe(probe_type, probe_name, result).await;
    }
}

fn epoch_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
