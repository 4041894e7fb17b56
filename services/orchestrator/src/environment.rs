//! Environment lifecycle.
//!
//! An environment is everything deployed into one namespace: the contract
//! host, key management and the bootstrap seeds (workers are scaled
//! separately). State transitions:
//!
//! ```text
//! Absent → Creating → Present → Deleting → Absent
//! ```
//!
//! The state is tracked in memory only. `Deleting` becomes `Absent` once
//! [`Orchestrator::environment_exists`] observes the namespace gone.
//! There is no rollback: a failed create stays `Creating` and leaves
//! whatever it already submitted in place.

use std::time::Duration;

use fleet_naming::AppKind;
use fleet_reconcile::for_each_bounded;
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::OrchestratorResult;
use crate::Orchestrator;

/// Lifecycle state of a namespace-scoped environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentState {
    #[default]
    Absent,
    Creating,
    Present,
    Deleting,
}

impl EnvironmentState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EnvironmentState::Absent => "absent",
            EnvironmentState::Creating => "creating",
            EnvironmentState::Present => "present",
            EnvironmentState::Deleting => "deleting",
        }
    }
}

impl std::fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Orchestrator {
    /// Tracked lifecycle state; `Absent` for namespaces never seen.
    pub async fn environment_state(&self, namespace: &str) -> EnvironmentState {
        self.environments
            .read()
            .await
            .get(namespace)
            .copied()
            .unwrap_or_default()
    }

    async fn set_environment_state(&self, namespace: &str, state: EnvironmentState) {
        let previous = self
            .environments
            .write()
            .await
            .insert(namespace.to_string(), state);
        if previous != Some(state) {
            info!(namespace, state = %state, "Environment state changed");
        }
    }

    /// Whether the namespace exists on the control plane.
    pub async fn environment_exists(&self, namespace: &str) -> OrchestratorResult<bool> {
        let namespaces = self.control_plane.list_namespaces().await?;
        let exists = namespaces.iter().any(|ns| ns.metadata.name == namespace);

        let tracked = self.environment_state(namespace).await;
        match (exists, tracked) {
            (false, EnvironmentState::Absent) => {}
            (false, _) => {
                self.set_environment_state(namespace, EnvironmentState::Absent)
                    .await
            }
            (true, EnvironmentState::Absent) => {
                self.set_environment_state(namespace, EnvironmentState::Present)
                    .await
            }
            (true, _) => {}
        }

        Ok(exists)
    }

    /// Deploy contract, key management and bootstraps into `namespace`.
    ///
    /// Key management is started `contract_grace` after the contract so the
    /// contract is reachable when it comes up.
    #[instrument(skip(self))]
    pub async fn create_environment(
        &self,
        namespace: &str,
        contract_grace: Duration,
    ) -> OrchestratorResult<()> {
        self.set_environment_state(namespace, EnvironmentState::Creating)
            .await;

        self.control_plane.ensure_namespace(namespace).await?;
        self.deploy_application(namespace, AppKind::Contract).await?;

        if !contract_grace.is_zero() {
            info!(
                namespace,
                grace_ms = contract_grace.as_millis() as u64,
                "Waiting for contract before starting key management"
            );
            tokio::time::sleep(contract_grace).await;
        }

        self.deploy_application(namespace, AppKind::Km).await?;
        let bootstraps = self.create_bootstraps(namespace).await?;

        self.set_environment_state(namespace, EnvironmentState::Present)
            .await;
        info!(namespace, bootstraps = bootstraps.len(), "Environment created");
        Ok(())
    }

    /// Delete every deployment. With `delete_services`, also delete every
    /// service and then the namespace; otherwise the namespace stays so the
    /// services keep their addresses.
    #[instrument(skip(self))]
    pub async fn delete_environment(
        &self,
        namespace: &str,
        delete_services: bool,
    ) -> OrchestratorResult<()> {
        self.set_environment_state(namespace, EnvironmentState::Deleting)
            .await;

        let limit = self.config.delete_concurrency;
        let cp = &self.control_plane;

        let deployments: Vec<String> = cp
            .list_deployments(namespace)
            .await?
            .into_iter()
            .map(|dp| dp.metadata.name)
            .collect();
        info!(namespace, count = deployments.len(), "Deleting deployments");
        for_each_bounded(deployments, limit, move |name: String| async move {
            cp.delete_deployment(namespace, &name).await
        })
        .await?;

        if delete_services {
            let services: Vec<String> = cp
                .list_services(namespace)
                .await?
                .into_iter()
                .map(|svc| svc.metadata.name)
                .collect();
            info!(namespace, count = services.len(), "Deleting services");
            for_each_bounded(services, limit, move |name: String| async move {
                cp.delete_service(namespace, &name).await
            })
            .await?;

            cp.delete_namespace(namespace).await?;
            info!(namespace, "Environment deletion requested");
        } else {
            info!(namespace, "Deployments deleted; services and namespace kept");
        }
        Ok(())
    }

    /// Tear the environment down if present, wait for the namespace to
    /// disappear, then create it again.
    #[instrument(skip(self))]
    pub async fn recreate_environment(&self, namespace: &str) -> OrchestratorResult<()> {
        if self.environment_exists(namespace).await? {
            self.delete_environment(namespace, true).await?;
            self.config
                .deletion_poll
                .poll_until("namespace deletion", || self.namespace_gone(namespace))
                .await?;
        }

        self.create_environment(namespace, Duration::ZERO).await
    }

    async fn namespace_gone(&self, namespace: &str) -> OrchestratorResult<Option<()>> {
        if self.environment_exists(namespace).await? {
            info!(namespace, "Namespace still terminating");
            Ok(None)
        } else {
            Ok(Some(()))
        }
    }
}
