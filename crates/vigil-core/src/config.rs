//! vigil.toml configuration parser.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::duration::{MAX_DURATION, format_duration, parse_duration};
use crate::error::{ConfigError, ConfigResult};

/// Probe names become label values and object name prefixes, so they are
/// restricted to DNS labels short enough to leave room for a suffix.
static PROBE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));

const MAX_PROBE_NAME_LEN: usize = 40;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(rename = "probe", default)]
    pub probes: Vec<ProbeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// `http://host:port` of the API server (typically `kubectl proxy`),
    /// or `memory://` for an in-process dry run.
    #[serde(default = "default_api_server")]
    pub api_server: String,
    /// Namespace in which probes create their disposable objects.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Optional bearer token file (service account token).
    pub token_file: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_server: default_api_server(),
            namespace: default_namespace(),
            token_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// One `[[probe]]` entry as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub probe_type: String,
    pub interval: String,
    pub timeout: String,
    #[serde(default)]
    pub params: toml::Table,
}

/// A validated probe entry: unique name, parsed durations, raw params.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSpec {
    pub name: String,
    pub probe_type: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub params: toml::Table,
}

fn default_api_server() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_namespace() -> String {
    "vigil".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:9102".to_string()
}

impl VigilConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate the whole file and produce one [`ProbeSpec`] per entry.
    ///
    /// Fails on the first problem found: bad or duplicate name, unparsable
    /// or zero durations, or a timeout that is not below the interval.
    pub fn validate(&self) -> ConfigResult<Vec<ProbeSpec>> {
        if self.cluster.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "cluster.namespace".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        let mut specs = Vec::with_capacity(self.probes.len());
        for probe in &self.probes {
            let spec = probe.validate()?;
            if !seen.insert(spec.name.clone()) {
                return Err(ConfigError::DuplicateName(spec.name));
            }
            specs.push(spec);
        }
        Ok(specs)
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> ConfigResult<ProbeSpec> {
        if self.name.len() > MAX_PROBE_NAME_LEN || !PROBE_NAME.is_match(&self.name) {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }

        let interval = self.duration_field("interval", &self.interval)?;
        let timeout = self.duration_field("timeout", &self.timeout)?;
        if timeout >= interval {
            return Err(ConfigError::TimeoutNotBelowInterval {
                probe: self.name.clone(),
                timeout: format_duration(timeout),
                interval: format_duration(interval),
            });
        }

        Ok(ProbeSpec {
            name: self.name.clone(),
            probe_type: self.probe_type.clone(),
            interval,
            timeout,
            params: self.params.clone(),
        })
    }

    fn duration_field(&self, field: &str, value: &str) -> ConfigResult<Duration> {
        let d = parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
            probe: self.name.clone(),
            field: field.to_string(),
            value: value.to_string(),
        })?;
        if d.is_zero() {
            return Err(ConfigError::ZeroDuration {
                probe: self.name.clone(),
                field: field.to_string(),
            });
        }
        if d > MAX_DURATION {
            return Err(ConfigError::DurationTooLong {
                probe: self.name.clone(),
                field: field.to_string(),
                value: value.to_string(),
                max: format_duration(MAX_DURATION),
            });
        }
        Ok(d)
    }
}

impl ProbeSpec {
    /// Build a spec directly, without going through a config file.
    pub fn new(name: &str, probe_type: &str, interval: Duration, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            probe_type: probe_type.to_string(),
            interval,
            timeout,
            params: toml::Table::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// A string parameter, if present.
    pub fn param_str(&self, key: &str) -> ConfigResult<Option<String>> {
        match self.params.get(key) {
            None => Ok(None),
            Some(toml::Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.invalid_param(key, "expected a string")),
        }
    }

    /// An unsigned integer parameter, or `default` when absent.
    pub fn param_u64(&self, key: &str, default: u64) -> ConfigResult<u64> {
        match self.params.get(key) {
            None => Ok(default),
            Some(toml::Value::Integer(i)) if *i >= 0 => Ok(*i as u64),
            Some(_) => Err(self.invalid_param(key, "expected a non-negative integer")),
        }
    }

    /// A duration parameter ("3s", "250ms", ...), or `default` when absent.
    pub fn param_duration(&self, key: &str, default: Duration) -> ConfigResult<Duration> {
        let d = match self.params.get(key) {
            None => return Ok(default),
            Some(toml::Value::String(s)) => {
                parse_duration(s).ok_or_else(|| self.invalid_param(key, "expected a duration"))?
            }
            Some(toml::Value::Integer(i)) if *i >= 0 => Duration::from_secs(*i as u64),
            Some(_) => return Err(self.invalid_param(key, "expected a duration")),
        };
        if d > MAX_DURATION {
            return Err(self.invalid_param(
                key,
                &format!("must not exceed {}", format_duration(MAX_DURATION)),
            ));
        }
        Ok(d)
    }

    /// Every sub-step budget must be non-zero and strictly shorter than the
    /// probe's overall timeout.
    pub fn ensure_within(&self, key: &str, budget: Duration) -> ConfigResult<()> {
        if budget.is_zero() {
            return Err(self.invalid_param(key, "must be greater than zero"));
        }
        if budget >= self.timeout {
            return Err(self.invalid_param(
                key,
                &format!(
                    "{} must be less than the probe timeout {}",
                    format_duration(budget),
                    format_duration(self.timeout)
                ),
            ));
        }
        Ok(())
    }

    pub fn invalid_param(&self, key: &str, reason: &str) -> ConfigError {
        ConfigError::InvalidParam {
            probe: self.name.clone(),
            param: key.to_string(),
            reason: reason.to_string(),
        }
    }
}
