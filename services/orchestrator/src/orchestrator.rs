//! The orchestrator context.
//!
//! Every fleet operation is a method on [`Orchestrator`]. It owns the
//! per-namespace state that only lives as long as the process:
//! - SGX mode per namespace (default SW)
//! - Status snapshots and their refresh tasks
//! - Environment lifecycle state
//!
//! Cloning is cheap; clones share all state.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_naming::AppKind;
use tokio::sync::RwLock;
use tracing::info;

use crate::client::ControlPlane;
use crate::config::OrchestratorConfig;
use crate::environment::EnvironmentState;
use crate::error::OrchestratorResult;
use crate::manifest::SgxMode;
use crate::peers::PeerSource;
use crate::status::StatusCache;
use crate::templates::{TemplateManifests, TemplateStore};

#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) control_plane: Arc<dyn ControlPlane>,
    pub(crate) templates: Arc<dyn TemplateStore>,
    pub(crate) peers: Arc<dyn PeerSource>,
    pub(crate) config: Arc<OrchestratorConfig>,
    pub(crate) cache: Arc<StatusCache>,
    pub(crate) environments: Arc<RwLock<HashMap<String, EnvironmentState>>>,
    sgx_modes: Arc<RwLock<HashMap<String, SgxMode>>>,
}

impl Orchestrator {
    /// Create an orchestrator over the given collaborators.
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        templates: Arc<dyn TemplateStore>,
        peers: Arc<dyn PeerSource>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            control_plane,
            templates,
            peers,
            config: Arc::new(config),
            cache: Arc::new(StatusCache::default()),
            environments: Arc::new(RwLock::new(HashMap::new())),
            sgx_modes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        &self.control_plane
    }

    /// Set the SGX mode used for every manifest created in `namespace`.
    pub async fn set_sgx_mode(&self, namespace: &str, mode: SgxMode) {
        info!(namespace, mode = %mode, "Setting SGX mode");
        self.sgx_modes
            .write()
            .await
            .insert(namespace.to_string(), mode);
    }

    /// SGX mode of `namespace`; SW unless set.
    pub async fn sgx_mode(&self, namespace: &str) -> SgxMode {
        self.sgx_modes
            .read()
            .await
            .get(namespace)
            .copied()
            .unwrap_or_default()
    }

    /// Load an application's templates with the namespace's SGX mode applied
    /// to the deployment.
    pub(crate) async fn load_for_namespace(
        &self,
        namespace: &str,
        app: AppKind,
    ) -> OrchestratorResult<TemplateManifests> {
        let TemplateManifests {
            deployment,
            service,
        } = self.templates.load(app)?;
        let mode = self.sgx_mode(namespace).await;

        Ok(TemplateManifests {
            deployment: deployment.with_sgx_mode(mode),
            service,
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
