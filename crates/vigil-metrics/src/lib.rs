//! vigil-metrics: what happened to every probe, in Prometheus form.
//!
//! # Architecture
//!
//! ```text
//! Scheduler ── record() ──► MetricsCollector (ResultSink)
//!                              └── snapshot() → Vec<ProbeSnapshot>
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{MetricsCollector, ProbeSnapshot, RunResult};
pub use prometheus::render_prometheus;
