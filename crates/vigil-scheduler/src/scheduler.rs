//! Scheduler: one independent loop per probe.
//!
//! Each loop ticks on `tokio::time::interval` with
//! `MissedTickBehavior::Delay`, so the first run starts immediately and an
//! overrunning run pushes the next tick back instead of causing a burst.
//! Runs are spawned as their own task so that a run which ignores its
//! deadline can be aborted without stalling the loop. On shutdown a run in
//! flight is allowed to finish its cleanup, up to its hard deadline, before
//! the loop exits.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use vigil_core::{ProbeSpec, format_duration};
use vigil_health::context::shutdown_signalled;
use vigil_health::{Outcome, Probe, ProbeError, RUN_TIMEOUT, ResultSink, RunContext};

use crate::error::{SchedulerError, SchedulerResult};

/// A probe bound to its interval and timeout.
#[derive(Clone)]
pub struct ProbeSchedule {
    pub name: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub probe: Arc<dyn Probe>,
}

impl ProbeSchedule {
    pub fn new(probe: Arc<dyn Probe>, interval: Duration, timeout: Duration) -> Self {
        Self {
            name: probe.name().to_string(),
            interval,
            timeout,
            probe,
        }
    }

    /// Bind a built probe to the timing of the spec it was built from.
    pub fn from_spec(spec: &ProbeSpec, probe: Arc<dyn Probe>) -> Self {
        Self {
            name: spec.name.clone(),
            interval: spec.interval,
            timeout: spec.timeout,
            probe,
        }
    }
}

impl fmt::Debug for ProbeSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeSchedule")
            .field("name", &self.name)
            .field("type", &self.probe.probe_type())
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Loop state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Waiting,
    Running,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopState::Waiting => "waiting",
            LoopState::Running => "running",
            LoopState::Stopped => "stopped",
        })
    }
}

pub struct Scheduler {
    schedules: Vec<ProbeSchedule>,
    sink: Arc<dyn ResultSink>,
}

impl Scheduler {
    /// Validate the schedule set. Names must be unique and both durations
    /// non-zero.
    pub fn new(schedules: Vec<ProbeSchedule>, sink: Arc<dyn ResultSink>) -> SchedulerResult<Self> {
        let mut seen = HashSet::new();
        for schedule in &schedules {
            if !seen.insert(schedule.name.as_str()) {
                return Err(SchedulerError::DuplicateName(schedule.name.clone()));
            }
            if schedule.interval.is_zero() {
                return Err(SchedulerError::ZeroInterval(schedule.name.clone()));
            }
            if schedule.timeout.is_zero() {
                return Err(SchedulerError::ZeroTimeout(schedule.name.clone()));
            }
        }
        Ok(Self { schedules, sink })
    }

    pub fn schedules(&self) -> &[ProbeSchedule] {
        &self.schedules
    }

    /// Run every loop until `shutdown` fires, then wait for all of them.
    ///
    /// Returns `Cancelled` on a clean stop, or `LoopPanicked` for the first
    /// loop task that died.
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> SchedulerResult<()> {
        if self.schedules.is_empty() {
            info!("no probes configured, waiting for shutdown");
            shutdown_signalled(&mut shutdown).await;
            return Err(SchedulerError::Cancelled);
        }

        let mut loops = JoinSet::new();
        for schedule in &self.schedules {
            loops.spawn(run_loop(
                schedule.clone(),
                Arc::clone(&self.sink),
                shutdown.clone(),
            ));
        }
        info!(probes = self.schedules.len(), "scheduler started");

        let mut first_error = None;
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                let message = join_error_message(e);
                error!(error = %message, "probe loop died");
                first_error.get_or_insert(SchedulerError::LoopPanicked(message));
            }
        }

        info!("scheduler stopped");
        Err(first_error.unwrap_or(SchedulerError::Cancelled))
    }
}

async fn run_loop(
    schedule: ProbeSchedule,
    sink: Arc<dyn ResultSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = schedule.name.as_str();
    let mut ticker = tokio::time::interval(schedule.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(probe = %name, interval = %format_duration(schedule.interval), state = %LoopState::Waiting, "probe loop starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_signalled(&mut shutdown) => break,
        }

        debug!(probe = %name, state = %LoopState::Running, "tick");
        match run_once(&schedule, &shutdown).await {
            Some(result) => {
                sink.record(schedule.probe.probe_type(), name, result.as_ref())
                    .await;
                debug!(probe = %name, state = %LoopState::Waiting, "run recorded");
            }
            None => break,
        }
    }

    debug!(probe = %name, state = %LoopState::Stopped, "probe loop stopped");
}

/// One run in its own task. `None` means shutdown interrupted it.
async fn run_once(
    schedule: &ProbeSchedule,
    shutdown: &watch::Receiver<bool>,
) -> Option<Result<Outcome, ProbeError>> {
    let ctx = RunContext::new(schedule.timeout, shutdown.clone());
    let hard_deadline = ctx.hard_deadline();
    let probe = Arc::clone(&schedule.probe);
    let mut task = tokio::spawn(async move { probe.run(ctx).await });
    let mut shutdown = shutdown.clone();

    tokio::select! {
        joined = &mut task => Some(match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ProbeError::Panicked(join_error_message(e))),
            Err(e) => Err(ProbeError::Aborted(e.to_string())),
        }),
        _ = tokio::time::sleep_until(hard_deadline) => {
            task.abort();
            warn!(probe = %schedule.name, timeout = %format_duration(schedule.timeout), "run overstayed its deadline, aborted");
            Some(Ok(Outcome::unhealthy(
                RUN_TIMEOUT,
                format!("run did not finish within {}", format_duration(schedule.timeout)),
            )))
        }
        _ = shutdown_signalled(&mut shutdown) => {
            // The run sees the same signal and cleans up; give it until the
            // hard deadline to do so.
            debug!(probe = %schedule.name, "shutdown during run, waiting for cleanup");
            if tokio::time::timeout_at(hard_deadline, &mut task).await.is_err() {
                task.abort();
                warn!(probe = %schedule.name, "run did not wind down before its hard deadline, aborted");
            }
            None
        }
    }
}

fn join_error_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    panic_message(e.into_panic())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;

    /// Result as recorded: outcome label plus code, or the error text.
    type Recorded = Result<(String, Option<&'static str>), String>;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<(String, Recorded)>>,
    }

    impl RecordingSink {
        fn for_probe(&self, name: &str) -> Vec<Recorded> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, r)| r.clone())
                .collect()
        }

        fn counts(&self) -> HashMap<String, usize> {
            let mut counts = HashMap::new();
            for (name, _) in self.records.lock().unwrap().iter() {
                *counts.entry(name.clone()).or_default() += 1;
            }
            counts
        }
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn record(&self, _probe_type: &str, probe_name: &str, result: Result<&Outcome, &ProbeError>) {
            let recorded = match result {
                Ok(outcome) => Ok((outcome.label().to_string(), outcome.code())),
                Err(e) => Err(e.to_string()),
            };
            self.records
                .lock()
                .unwrap()
                .push((probe_name.to_string(), recorded));
        }
    }

    enum Behaviour {
        Healthy,
        /// Ignores its context entirely.
        Hang,
        /// Waits for shutdown, then spends a while cleaning up.
        CleanUpOnShutdown,
        Panic,
    }

    struct TestProbe {
        name: String,
        behaviour: Behaviour,
        runs: AtomicUsize,
        dropped_mid_run: Arc<AtomicBool>,
        cleaned_up: AtomicBool,
    }

    impl TestProbe {
        fn new(name: &str, behaviour: Behaviour) -> Self {
            Self {
                name: name.to_string(),
                behaviour,
                runs: AtomicUsize::new(0),
                dropped_mid_run: Arc::new(AtomicBool::new(false)),
                cleaned_up: AtomicBool::new(false),
            }
        }
    }

    /// Flags the run future being dropped before it finished.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Probe for TestProbe {
        fn name(&self) -> &str {
            &self.name
        }

        fn probe_type(&self) -> &str {
            "test"
        }

        async fn run(&self, ctx: RunContext) -> Result<Outcome, ProbeError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Healthy => Ok(Outcome::Healthy),
                Behaviour::Hang => {
                    let _flag = DropFlag(Arc::clone(&self.dropped_mid_run));
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Outcome::Healthy)
                }
                Behaviour::CleanUpOnShutdown => {
                    ctx.cancelled().await;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    self.cleaned_up.store(true, Ordering::SeqCst);
                    Err(ProbeError::Aborted("shutdown".to_string()))
                }
                Behaviour::Panic => panic!("probe blew up"),
            }
        }
    }

    fn schedule(probe: Arc<TestProbe>, interval_ms: u64, timeout_ms: u64) -> ProbeSchedule {
        ProbeSchedule::new(
            probe,
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let a = Arc::new(TestProbe::new("a", Behaviour::Healthy));
        let err = Scheduler::new(
            vec![schedule(a.clone(), 100, 50), schedule(a, 200, 50)],
            Arc::new(RecordingSink::default()),
        )
        .err()
        .unwrap();
        assert_eq!(err, SchedulerError::DuplicateName("a".to_string()));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let sink: Arc<dyn ResultSink> = Arc::new(RecordingSink::default());
        let a = Arc::new(TestProbe::new("a", Behaviour::Healthy));
        assert_eq!(
            Scheduler::new(vec![schedule(a.clone(), 0, 50)], Arc::clone(&sink)).err(),
            Some(SchedulerError::ZeroInterval("a".to_string()))
        );
        assert_eq!(
            Scheduler::new(vec![schedule(a, 100, 0)], sink).err(),
            Some(SchedulerError::ZeroTimeout("a".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn three_probes_run_on_their_own_intervals() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::new(
            vec![
                schedule(Arc::new(TestProbe::new("a", Behaviour::Healthy)), 50, 40),
                schedule(Arc::new(TestProbe::new("b", Behaviour::Healthy)), 50, 40),
                schedule(Arc::new(TestProbe::new("c", Behaviour::Healthy)), 200, 100),
            ],
            sink.clone(),
        )
        .unwrap();

        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(async move { scheduler.start(rx).await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(true).unwrap();

        assert_eq!(running.await.unwrap(), Err(SchedulerError::Cancelled));
        let counts = sink.counts();
        assert!(counts["a"] >= 4, "a ran {} times", counts["a"]);
        assert!(counts["b"] >= 4, "b ran {} times", counts["b"]);
        assert!(counts["c"] >= 1, "c ran {} times", counts["c"]);
        assert!(
            sink.for_probe("a")
                .iter()
                .all(|r| r == &Ok(("healthy".to_string(), None)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_count_tracks_interval() {
        let probe = Arc::new(TestProbe::new("steady", Behaviour::Healthy));
        let scheduler = Scheduler::new(
            vec![schedule(probe.clone(), 1000, 500)],
            Arc::new(RecordingSink::default()),
        )
        .unwrap();

        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(async move { scheduler.start(rx).await });
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        tx.send(true).unwrap();
        running.await.unwrap().unwrap_err();

        // Ticks at 0, 1s, ..., 10s.
        assert!(probe.runs.load(Ordering::SeqCst) >= 9);
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_probe_is_aborted_and_recorded_as_run_timeout() {
        let sink = Arc::new(RecordingSink::default());
        let probe = Arc::new(TestProbe::new("stuck", Behaviour::Hang));
        let scheduler =
            Scheduler::new(vec![schedule(probe.clone(), 5000, 1000)], sink.clone()).unwrap();

        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(async move { scheduler.start(rx).await });
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let records = sink.for_probe("stuck");
        assert_eq!(records, vec![Ok(("unhealthy".to_string(), Some(RUN_TIMEOUT)))]);
        assert!(probe.dropped_mid_run.load(Ordering::SeqCst));

        tx.send(true).unwrap();
        running.await.unwrap().unwrap_err();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_run_cleanup() {
        let sink = Arc::new(RecordingSink::default());
        let probe = Arc::new(TestProbe::new("slow", Behaviour::CleanUpOnShutdown));
        let scheduler =
            Scheduler::new(vec![schedule(probe.clone(), 60_000, 30_000)], sink.clone()).unwrap();

        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(async move { scheduler.start(rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 1);

        let signalled = Instant::now();
        tx.send(true).unwrap();
        assert_eq!(running.await.unwrap(), Err(SchedulerError::Cancelled));

        // Returned only after the run finished cleaning up, and promptly.
        assert!(probe.cleaned_up.load(Ordering::SeqCst));
        assert!(signalled.elapsed() < Duration::from_secs(1));
        assert!(sink.for_probe("slow").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_a_run_that_ignores_it_at_the_hard_deadline() {
        let sink = Arc::new(RecordingSink::default());
        let probe = Arc::new(TestProbe::new("deaf", Behaviour::Hang));
        let scheduler =
            Scheduler::new(vec![schedule(probe.clone(), 60_000, 5_000)], sink.clone()).unwrap();

        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(async move { scheduler.start(rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let signalled = Instant::now();
        tx.send(true).unwrap();
        assert_eq!(running.await.unwrap(), Err(SchedulerError::Cancelled));

        // Hard deadline: 5s timeout plus 500ms grace, counted from the tick.
        let waited = signalled.elapsed();
        assert!(waited >= Duration::from_millis(5_300), "{waited:?}");
        assert!(waited <= Duration::from_millis(5_500), "{waited:?}");

        for _ in 0..10 {
            if probe.dropped_mid_run.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(probe.dropped_mid_run.load(Ordering::SeqCst));
        assert!(sink.for_probe("deaf").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_stops_the_scheduler() {
        let probe = Arc::new(TestProbe::new("a", Behaviour::Healthy));
        let scheduler = Scheduler::new(
            vec![schedule(probe, 100, 50)],
            Arc::new(RecordingSink::default()),
        )
        .unwrap();

        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(async move { scheduler.start(rx).await });
        tokio::time::sleep(Duration::from_millis(250)).await;
        drop(tx);
        assert_eq!(running.await.unwrap(), Err(SchedulerError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_probe_is_recorded_as_invocation_error() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::new(
            vec![
                schedule(Arc::new(TestProbe::new("boom", Behaviour::Panic)), 100, 50),
                schedule(Arc::new(TestProbe::new("fine", Behaviour::Healthy)), 100, 50),
            ],
            sink.clone(),
        )
        .unwrap();

        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(async move { scheduler.start(rx).await });
        tokio::time::sleep(Duration::from_millis(250)).await;
        tx.send(true).unwrap();
        // A panicking run does not take its loop down.
        assert_eq!(running.await.unwrap(), Err(SchedulerError::Cancelled));

        let boom = sink.for_probe("boom");
        assert!(boom.len() >= 2);
        assert!(
            boom.iter()
                .all(|r| r == &Err("probe panicked: probe blew up".to_string()))
        );
        assert!(sink.for_probe("fine").len() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_probes_waits_for_shutdown() {
        let scheduler = Scheduler::new(Vec::new(), Arc::new(RecordingSink::default())).unwrap();
        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(async move { scheduler.start(rx).await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!running.is_finished());
        tx.send(true).unwrap();
        assert_eq!(running.await.unwrap(), Err(SchedulerError::Cancelled));
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "non-string panic payload");
    }
}
