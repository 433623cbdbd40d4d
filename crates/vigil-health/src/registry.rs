//! Probe registry: maps a type identifier to a constructor.
//!
//! The registry is an ordinary value: the daemon builds one at startup,
//! registers every probe kind, resolves the configured probes, and never
//! mutates it again.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use vigil_cluster::ClusterApi;
use vigil_core::{ConfigError, ProbeSpec};

use crate::probe::Probe;
use crate::probes;

/// Errors resolving a configured probe into an instance.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unrecognized probe type: {0}")]
    UnrecognizedType(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("probe {probe}: {reason}")]
    Construct { probe: String, reason: String },
}

/// Shared dependencies handed to every constructor.
#[derive(Clone)]
pub struct BuildContext {
    pub cluster: Arc<dyn ClusterApi>,
    /// Namespace for disposable objects.
    pub namespace: String,
}

impl BuildContext {
    pub fn new(cluster: Arc<dyn ClusterApi>, namespace: &str) -> Self {
        Self {
            cluster,
            namespace: namespace.to_string(),
        }
    }
}

/// Builds a probe from its validated spec.
pub type Constructor =
    Box<dyn Fn(&ProbeSpec, &BuildContext) -> Result<Arc<dyn Probe>, RegistryError> + Send + Sync>;

#[derive(Default)]
pub struct ProbeRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in probe kind.
    pub fn with_builtin_probes() -> Self {
        let mut registry = Self::new();
        probes::register_builtin(&mut registry);
        registry
    }

    /// Register a constructor. Registering a type twice replaces the first
    /// constructor and is almost certainly a bug in the caller.
    pub fn register<F>(&mut self, type_id: &str, constructor: F)
    where
        F: Fn(&ProbeSpec, &BuildContext) -> Result<Arc<dyn Probe>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        if self
            .constructors
            .insert(type_id.to_string(), Box::new(constructor))
            .is_some()
        {
            warn!(%type_id, "probe type registered twice, replacing constructor");
        } else {
            debug!(%type_id, "probe type registered");
        }
    }

    /// Resolve a spec into a probe instance.
    pub fn build(&self, spec: &ProbeSpec, ctx: &BuildContext) -> Result<Arc<dyn Probe>, RegistryError> {
        let constructor = self
            .constructors
            .get(&spec.probe_type)
            .ok_or_else(|| RegistryError::UnrecognizedType(spec.probe_type.clone()))?;
        constructor(spec, ctx)
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.constructors.contains_key(type_id)
    }

    /// Registered type identifiers, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }
}
