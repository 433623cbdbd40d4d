//! vigil-core: configuration model shared by every Vigil crate.
//!
//! Parses `vigil.toml`, validates it, and turns each `[[probe]]` entry into
//! a [`ProbeSpec`] with parsed durations and its raw parameter block. Probe
//! kinds read their own parameters from the spec at construction time.

pub mod config;
pub mod duration;
pub mod error;

pub use config::{ClusterConfig, MetricsConfig, ProbeConfig, ProbeSpec, VigilConfig};
pub use duration::{MAX_DURATION, format_duration, parse_duration};
pub use error::{ConfigError, ConfigResult};
