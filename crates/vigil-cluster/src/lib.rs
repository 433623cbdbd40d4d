//! vigil-cluster: the remote API seam for Vigil probes.
//!
//! Probes never talk to the API server directly. They go through the
//! [`ClusterApi`] trait, which exposes exactly the operations the resource
//! lifecycle needs: create, get, delete, list-by-owner, plus a raw GET for
//! read-only checks.
//!
//! # Backends
//!
//! ```text
//! ClusterApi
//!   ├── HttpCluster      plain HTTP/1.1 to the API server (kubectl proxy)
//!   └── InMemoryCluster  in-process object map with fault injection
//! ```
//!
//! Every object a probe creates carries two tags: the owner label
//! [`OWNER_LABEL`] and the creation annotation [`CREATED_AT_ANNOTATION`].
//! Garbage collection keys on both.

pub mod api;
pub mod error;
pub mod rest;
pub mod memory;
pub mod types;

use std::sync::Arc;

pub use api::ClusterApi;
pub use error::{ClusterError, ClusterResult};
pub use rest::HttpCluster;
pub use memory::InMemoryCluster;
pub use types::*;

/// Build a cluster client from an `api_server` URL.
///
/// `memory://` selects the in-process backend; `http://host:port` the HTTP
/// backend.
pub fn connect(api_server: &str, token: Option<String>) -> ClusterResult<Arc<dyn ClusterApi>> {
    if api_server.starts_with("memory://") {
        tracing::info!("using in-memory cluster backend");
        return Ok(Arc::new(InMemoryCluster::new()));
    }
    Ok(Arc::new(HttpCluster::new(api_server, token)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_selects_backend() {
        assert!(connect("memory://", None).is_ok());
        assert!(connect("http://127.0.0.1:8001", None).is_ok());
        assert!(matches!(
            connect("https://10.0.0.1:6443", None),
            Err(ClusterError::Unsupported(_))
        ));
    }
}
