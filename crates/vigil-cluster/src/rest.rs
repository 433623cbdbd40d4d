//! HTTP backend for the Kubernetes core/v1 REST API.
//!
//! Speaks plain HTTP/1.1, one connection per call, which is what
//! `kubectl proxy` (or an in-cluster sidecar proxy) expects. TLS to the API
//! server is left to that proxy.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use serde_json::{Value, json};
use tracing::debug;

use crate::api::ClusterApi;
use crate::error::{ClusterError, ClusterResult};
use crate::types::{
    CREATED_AT_ANNOTATION, DEFAULT_POD_IMAGE, ManagedResource, OWNER_LABEL, ResourceKey, ResourceKind,
};

/// Cluster client that talks to the API server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCluster {
    /// `host:port` of the API server.
    authority: String,
    /// Bearer token sent with every request, if any.
    token: Option<String>,
}

impl HttpCluster {
    /// Create a client for an `http://host:port` API server URL.
    pub fn new(api_server: &str, token: Option<String>) -> ClusterResult<Self> {
        let uri: Uri = api_server
            .parse()
            .map_err(|e| ClusterError::Unsupported(format!("invalid api_server {api_server:?}: {e}")))?;
        if uri.scheme_str() != Some("http") {
            return Err(ClusterError::Unsupported(format!(
                "api_server {api_server:?} must use http:// (run through kubectl proxy for TLS)"
            )));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| ClusterError::Unsupported(format!("api_server {api_server:?} has no host")))?;
        let authority = match authority.port_u16() {
            Some(_) => authority.to_string(),
            None => format!("{}:80", authority.host()),
        };
        Ok(Self { authority, token })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Send one request and return status and body.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> ClusterResult<(StatusCode, Bytes)> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| ClusterError::Transport(format!("connect {}: {e}", self.authority)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ClusterError::Transport(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let payload = match body {
            Some(value) => Bytes::from(
                serde_json::to_vec(&value).map_err(|e| ClusterError::Decode(e.to_string()))?,
            ),
            None => Bytes::new(),
        };

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(path)
            .header("host", &self.authority)
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .header("user-agent", "vigil/0.1");
        if let Some(token) = &self.token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = builder
            .body(Full::new(payload))
            .map_err(|e| ClusterError::Transport(format!("build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ClusterError::Transport(format!("{method} {path}: {e}")))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ClusterError::Transport(format!("read body: {e}")))?
            .to_bytes();

        debug!(%method, %path, status = status.as_u16(), "api request");
        Ok((status, bytes))
    }

    /// Send a request and decode a JSON body, mapping non-2xx to errors.
    async fn send_json(&self, method: Method, path: &str, body: Option<Value>) -> ClusterResult<Value> {
        let (status, bytes) = self.send(method, path, body).await?;
        if !status.is_success() {
            return Err(ClusterError::from_status(status.as_u16(), status_message(status, &bytes)));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| ClusterError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ClusterApi for HttpCluster {
    async fn create(&self, resource: &ManagedResource) -> ClusterResult<ManagedResource> {
        let path = collection_path(resource.kind, &resource.namespace);
        let value = self
            .send_json(Method::POST, &path, Some(to_object(resource)))
            .await?;
        from_object(resource.kind, &value)
    }

    async fn get(&self, key: &ResourceKey) -> ClusterResult<ManagedResource> {
        let value = self.send_json(Method::GET, &object_path(key), None).await?;
        from_object(key.kind, &value)
    }

    async fn delete(&self, key: &ResourceKey) -> ClusterResult<()> {
        let path = format!("{}?gracePeriodSeconds=0", object_path(key));
        self.send_json(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn list_owned(
        &self,
        kind: ResourceKind,
        namespace: &str,
        owner: &str,
    ) -> ClusterResult<Vec<ManagedResource>> {
        let path = format!(
            "{}?labelSelector={}%3D{}",
            collection_path(kind, namespace),
            OWNER_LABEL.replace('/', "%2F"),
            owner
        );
        let value = self.send_json(Method::GET, &path, None).await?;
        let items = value
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| ClusterError::Decode("list response has no items".to_string()))?;
        items.iter().map(|item| from_object(kind, item)).collect()
    }

    async fn get_raw(&self, path: &str) -> ClusterResult<Value> {
        self.send_json(Method::GET, path, None).await
    }
}

fn collection_path(kind: ResourceKind, namespace: &str) -> String {
    format!("/api/v1/namespaces/{namespace}/{}", kind.plural())
}

fn object_path(key: &ResourceKey) -> String {
    format!("{}/{}", collection_path(key.kind, &key.namespace), key.name)
}

/// Prefer the `message` field of a Kubernetes `Status` body.
fn status_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.to_string())
}

/// Encode a resource as a Kubernetes object body.
pub(crate) fn to_object(resource: &ManagedResource) -> Value {
    let metadata = json!({
        "name": resource.name,
        "namespace": resource.namespace,
        "labels": { OWNER_LABEL: resource.owner },
        "annotations": { CREATED_AT_ANNOTATION: resource.created_at_ms.to_string() },
    });
    match resource.kind {
        ResourceKind::ConfigMap => json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": metadata,
            "data": resource.data,
        }),
        ResourceKind::Pod => json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": metadata,
            "spec": {
                "restartPolicy": "Never",
                "terminationGracePeriodSeconds": 0,
                "containers": [{
                    "name": "probe",
                    "image": resource.image.as_deref().unwrap_or(DEFAULT_POD_IMAGE),
                }],
            },
        }),
    }
}

/// Decode a Kubernetes object body.
///
/// A missing creation annotation decodes as epoch 0, which makes the object
/// immediately eligible for garbage collection.
pub(crate) fn from_object(kind: ResourceKind, value: &Value) -> ClusterResult<ManagedResource> {
    let metadata = value
        .get("metadata")
        .ok_or_else(|| ClusterError::Decode("object has no metadata".to_string()))?;
    let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);

    let name = text(metadata.get("name"))
        .ok_or_else(|| ClusterError::Decode("object has no name".to_string()))?;
    let namespace = text(metadata.get("namespace")).unwrap_or_default();
    let owner = text(metadata.pointer("/labels").and_then(|l| l.get(OWNER_LABEL)))
        .unwrap_or_default();
    let created_at_ms = text(metadata.pointer("/annotations").and_then(|a| a.get(CREATED_AT_ANNOTATION)))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let data: BTreeMap<String, String> = value
        .get("data")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let image = text(value.pointer("/spec/containers/0/image"));
    let phase = text(value.pointer("/status/phase"));

    Ok(ManagedResource {
        kind,
        namespace,
        name,
        owner,
        created_at_ms,
        data,
        image,
        phase,
    })
}
