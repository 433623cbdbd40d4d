//! vigild: the Vigil daemon.
//!
//! Assembles every Vigil subsystem in one process:
//! - Cluster client (HTTP or in-memory)
//! - Probe registry with the built-in probe kinds
//! - Scheduler
//! - Metrics collector and `/metrics` endpoint

pub mod daemon;
pub mod router;

pub use router::build_router;
