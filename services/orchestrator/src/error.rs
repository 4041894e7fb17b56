//! Orchestration error types.

use fleet_naming::AppKind;
use fleet_reconcile::ReconcileError;
use thiserror::Error;

use crate::client::ClientError;
use crate::peers::PeerSourceError;
use crate::templates::TemplateError;

/// Errors surfaced by [`crate::Orchestrator`] operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("control plane error: {0}")]
    Client(#[from] ClientError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("peer source error: {0}")]
    PeerSource(#[from] PeerSourceError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// No worker exists to pick from.
    #[error("no workers in namespace '{namespace}'")]
    NoWorkers { namespace: String },

    /// No pod backs the deployment.
    #[error("no pod found for '{deployment}' in namespace '{namespace}'")]
    PodNotFound {
        namespace: String,
        deployment: String,
    },

    /// The published peer list does not line up with the bootstrap set.
    #[error("expected {expected} bootstrap peer addresses, got {actual}")]
    PeerCountMismatch { expected: usize, actual: usize },

    /// A published peer address carries no identity segment.
    #[error("peer address '{0}' has no identity segment")]
    MalformedPeerAddress(String),

    /// A bootstrap service vanished between polling and deployment.
    #[error("service for bootstrap {index} has no external address")]
    ServiceNotReady { index: u32 },

    /// An in-pod config file was not valid JSON.
    #[error("invalid config file in {app} pod: {source}")]
    InvalidConfigFile {
        app: AppKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write debug manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to render manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for orchestration operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
