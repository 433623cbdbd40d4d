//! vigil-health: the probe contract and everything a probe run needs.
//!
//! A probe is an opaque `run(ctx) -> Result<Outcome, ProbeError>` capability.
//! This crate defines that contract, the closed [`Outcome`] type, the step
//! classifier that turns raw failures into stable codes, the resource
//! lifecycle helper shared by probes that provision disposable objects, the
//! probe registry, and the built-in probe kinds.
//!
//! # Architecture
//!
//! ```text
//! ProbeRegistry ── build(spec) ──► Arc<dyn Probe>
//!
//! Probe::run(RunContext)
//!   ├── Lifecycle::run (GC → quota → create → observe → delete)
//!   │     └── run_step(Step, ..) → Outcome on timeout / error
//!   └── Result<Outcome, ProbeError> ──► ResultSink::record
//! ```
//!
//! # Outcome vs. error
//!
//! `Outcome::Unhealthy` means the thing under test is broken and always
//! carries a code from a fixed vocabulary. `Outcome::Indeterminate` means the
//! probe declined to test (quota exceeded). `ProbeError` means the probe
//! could not even get to the test.

pub mod classify;
pub mod context;
pub mod lifecycle;
pub mod outcome;
pub mod probe;
pub mod probes;
pub mod registry;
pub mod sink;

pub use classify::{RUN_TIMEOUT, Step, classify, run_step};
pub use context::RunContext;
pub use lifecycle::{GcReport, Lifecycle, ResourceTemplate};
pub use outcome::Outcome;
pub use probe::{Probe, ProbeError};
pub use registry::{BuildContext, ProbeRegistry, RegistryError};
pub use sink::ResultSink;
