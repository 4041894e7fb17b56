//! Control-plane client interface.
//!
//! The orchestrator drives a remote cluster control plane through the
//! [`ControlPlane`] trait:
//! - Namespace, deployment, service and pod verbs
//! - Command execution inside a running container
//! - Create-or-replace (`upsert_*`) built on the raw verbs
//!
//! [`crate::kube::KubeClient`] talks to a real API server;
//! [`crate::mock::MockControlPlane`] keeps everything in memory.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::manifest::{Deployment, Namespace, Pod, Service};

/// Control-plane client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The resource already exists (HTTP 409).
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// The resource does not exist (HTTP 404).
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// Any other non-success response.
    #[error("control plane returned {status}: {body}")]
    Api { status: u16, body: String },

    /// Request never completed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Bearer token cannot be sent as a header value.
    #[error("invalid bearer token: {0}")]
    InvalidToken(String),

    /// Remote command failed or the exec stream broke.
    #[error("exec failed: {0}")]
    Exec(String),

    /// Response body did not decode.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// Returns true if this error is a create conflict.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClientError::AlreadyExists { .. })
    }

    /// Returns true if the resource was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

/// Result type for control-plane calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Carry server-owned fields from the live object onto a replacement.
pub trait MergeImmutable {
    fn merge_immutable_from(&mut self, existing: &Self);
}

impl MergeImmutable for Deployment {
    fn merge_immutable_from(&mut self, existing: &Self) {
        self.metadata.resource_version = existing.metadata.resource_version.clone();
    }
}

impl MergeImmutable for Service {
    fn merge_immutable_from(&mut self, existing: &Self) {
        self.spec.cluster_ip = existing.spec.cluster_ip.clone();
        self.metadata.resource_version = existing.metadata.resource_version.clone();
    }
}

/// Cluster control-plane interface.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_namespace(&self, namespace: &Namespace) -> ClientResult<()>;
    async fn list_namespaces(&self) -> ClientResult<Vec<Namespace>>;
    async fn delete_namespace(&self, name: &str) -> ClientResult<()>;

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment)
        -> ClientResult<()>;
    async fn get_deployment(&self, namespace: &str, name: &str) -> ClientResult<Deployment>;
    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> ClientResult<()>;
    async fn list_deployments(&self, namespace: &str) -> ClientResult<Vec<Deployment>>;
    async fn delete_deployment(&self, namespace: &str, name: &str) -> ClientResult<()>;

    async fn create_service(&self, namespace: &str, service: &Service) -> ClientResult<()>;
    async fn get_service(&self, namespace: &str, name: &str) -> ClientResult<Service>;
    async fn replace_service(&self, namespace: &str, service: &Service) -> ClientResult<()>;
    async fn list_services(&self, namespace: &str) -> ClientResult<Vec<Service>>;
    async fn delete_service(&self, namespace: &str, name: &str) -> ClientResult<()>;

    async fn list_pods(&self, namespace: &str) -> ClientResult<Vec<Pod>>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> ClientResult<()>;

    /// Run `command` in the pod's primary container and return its stdout.
    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> ClientResult<String>;

    /// Create the namespace; an existing one is left as is.
    async fn ensure_namespace(&self, name: &str) -> ClientResult<()> {
        match self.create_namespace(&Namespace::named(name)).await {
            Err(e) if e.is_already_exists() => {
                debug!(namespace = %name, "Namespace already exists");
                Ok(())
            }
            other => other,
        }
    }

    /// Create the deployment, or replace it if one with the name exists.
    async fn upsert_deployment(&self, namespace: &str, deployment: &Deployment) -> ClientResult<()> {
        match self.create_deployment(namespace, deployment).await {
            Err(e) if e.is_already_exists() => {
                let name = &deployment.metadata.name;
                debug!(namespace, name = %name, "Deployment exists, replacing");
                let existing = self.get_deployment(namespace, name).await?;
                let mut replacement = deployment.clone();
                replacement.merge_immutable_from(&existing);
                self.replace_deployment(namespace, &replacement).await
            }
            other => other,
        }
    }

    /// Create the service, or replace it keeping the live `clusterIP` and
    /// `resourceVersion`.
    async fn upsert_service(&self, namespace: &str, service: &Service) -> ClientResult<()> {
        let fresh = service.clone().without_server_fields();
        match self.create_service(namespace, &fresh).await {
            Err(e) if e.is_already_exists() => {
                let name = &service.metadata.name;
                debug!(namespace, name = %name, "Service exists, replacing");
                let existing = self.get_service(namespace, name).await?;
                let mut replacement = fresh;
                replacement.merge_immutable_from(&existing);
                self.replace_service(namespace, &replacement).await
            }
            other => other,
        }
    }
}
