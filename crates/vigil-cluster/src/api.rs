//! The trait every cluster backend implements.

use async_trait::async_trait;

use crate::error::ClusterResult;
use crate::types::{ManagedResource, ResourceKey, ResourceKind};

/// Request/response access to the cluster's API server.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// from many probe loops at once. None of the calls apply their own
/// deadline; callers bound them.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create `resource` exactly as given (name, owner label and creation
    /// annotation included) and return the stored object.
    async fn create(&self, resource: &ManagedResource) -> ClusterResult<ManagedResource>;

    /// Fetch a single object. Missing objects are `ClusterError::NotFound`.
    async fn get(&self, key: &ResourceKey) -> ClusterResult<ManagedResource>;

    /// Delete a single object. Missing objects are `ClusterError::NotFound`.
    async fn delete(&self, key: &ResourceKey) -> ClusterResult<()>;

    /// List objects of `kind` in `namespace` carrying `owner` as owner label.
    async fn list_owned(
        &self,
        kind: ResourceKind,
        namespace: &str,
        owner: &str,
    ) -> ClusterResult<Vec<ManagedResource>>;

    /// GET an arbitrary API path and return the decoded JSON body.
    async fn get_raw(&self, path: &str) -> ClusterResult<serde_json::Value>;
}
