//! vigil-scheduler: runs every configured probe on its own interval.
//!
//! # Architecture
//!
//! ```text
//! Scheduler::start(shutdown)
//!   └── JoinSet, one loop task per ProbeSchedule
//!       └── per tick: spawn probe.run(ctx)
//!           ├── finished      → ResultSink::record(result)
//!           ├── hard deadline → abort, record Unhealthy(RunTimeout)
//!           └── shutdown      → abort, record nothing, loop stops
//! ```
//!
//! Loops share nothing but the sink and the shutdown receiver. `start`
//! returns once every loop has stopped.

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{ProbeSchedule, Scheduler};
