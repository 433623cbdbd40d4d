//! Object model for disposable, owner-tagged cluster objects.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Label carrying the name of the probe that created an object.
pub const OWNER_LABEL: &str = "vigil.io/owner";

/// Annotation carrying the creation time in Unix epoch milliseconds.
pub const CREATED_AT_ANNOTATION: &str = "vigil.io/created-at";

/// Container image for pods that do not name one.
pub const DEFAULT_POD_IMAGE: &str = "registry.k8s.io/pause:3.9";

/// The object kinds probes are allowed to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    ConfigMap,
    Pod,
}

impl ResourceKind {
    /// Resource collection name in the REST path.
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "configmaps",
            ResourceKind::Pod => "pods",
        }
    }

    /// `kind` field of the object body.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Pod => "Pod",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// Identity of a single object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A disposable object created by a probe run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedResource {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    /// Probe name; stored as the [`OWNER_LABEL`] label.
    pub owner: String,
    /// Stored as the [`CREATED_AT_ANNOTATION`] annotation.
    pub created_at_ms: u64,
    /// ConfigMap payload.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    /// Container image, for pods.
    #[serde(default)]
    pub image: Option<String>,
    /// Pod phase as reported by the server. Never sent on create.
    #[serde(default)]
    pub phase: Option<String>,
}

impl ManagedResource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Time elapsed since creation, relative to `now_ms`.
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.created_at_ms))
    }
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
