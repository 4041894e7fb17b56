//! Per-application controls: deploy, restart, turn off.
//!
//! Restarting deletes the application's pod and lets its deployment
//! replace it. Turning off deletes the deployment and, on request, its
//! service; deleting something already gone is not an error.

use fleet_naming::AppKind;
use tracing::{debug, info, instrument};

use crate::client::ClientResult;
use crate::error::OrchestratorResult;
use crate::Orchestrator;

/// Treat a missing resource as already deleted.
fn ignore_not_found(result: ClientResult<()>, kind: &str, name: &str) -> ClientResult<()> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!(kind, name, "Already deleted");
            Ok(())
        }
        other => other,
    }
}

impl Orchestrator {
    /// Create or replace the singleton deployment and service of `kind`.
    pub(crate) async fn deploy_application(
        &self,
        namespace: &str,
        kind: AppKind,
    ) -> OrchestratorResult<()> {
        let app = kind.deployment_name(None);
        let templates = self.load_for_namespace(namespace, kind).await?;

        let deployment = templates.deployment.with_app_name(&app);
        let service = templates
            .service
            .with_app_name(&kind.service_name(None), &app);

        self.control_plane
            .upsert_deployment(namespace, &deployment)
            .await?;
        self.control_plane.upsert_service(namespace, &service).await?;
        info!(namespace, app = %app, "Deployed application");
        Ok(())
    }

    /// Delete an application's deployment and optionally its service.
    #[instrument(skip(self))]
    pub async fn turn_off_application(
        &self,
        namespace: &str,
        kind: AppKind,
        index: Option<u32>,
        delete_service: bool,
    ) -> OrchestratorResult<()> {
        let deployment = kind.deployment_name(index);
        ignore_not_found(
            self.control_plane
                .delete_deployment(namespace, &deployment)
                .await,
            "deployment",
            &deployment,
        )?;

        if delete_service {
            let service = kind.service_name(index);
            ignore_not_found(
                self.control_plane.delete_service(namespace, &service).await,
                "service",
                &service,
            )?;
        }

        info!(namespace, app = %deployment, delete_service, "Turned off application");
        Ok(())
    }

    /// Delete a worker, a random one when no index is given.
    ///
    /// Returns the index of the deleted worker.
    pub async fn delete_worker(
        &self,
        namespace: &str,
        index: Option<u32>,
        delete_service: bool,
    ) -> OrchestratorResult<u32> {
        let index = self.resolve_worker_index(namespace, index).await?;
        self.turn_off_application(namespace, AppKind::Worker, Some(index), delete_service)
            .await?;
        Ok(index)
    }

    /// Delete the pod of an application so its deployment recreates it.
    #[instrument(skip(self))]
    pub async fn restart_application(
        &self,
        namespace: &str,
        kind: AppKind,
        index: Option<u32>,
    ) -> OrchestratorResult<()> {
        let deployment = kind.deployment_name(index);
        let pod = self.resolve_pod(namespace, &deployment).await?;
        self.control_plane.delete_pod(namespace, &pod).await?;

        info!(namespace, app = %deployment, pod = %pod, "Restarted application");
        Ok(())
    }

    /// Restart a worker, a random one when no index is given.
    ///
    /// Returns the index of the restarted worker.
    pub async fn restart_worker(&self, namespace: &str, index: Option<u32>) -> OrchestratorResult<u32> {
        let index = self.resolve_worker_index(namespace, index).await?;
        self.restart_application(namespace, AppKind::Worker, Some(index))
            .await?;
        Ok(index)
    }

    pub async fn restart_key_management(&self, namespace: &str) -> OrchestratorResult<()> {
        self.restart_application(namespace, AppKind::Km, None).await
    }

    pub async fn turn_on_key_management(&self, namespace: &str) -> OrchestratorResult<()> {
        self.deploy_application(namespace, AppKind::Km).await
    }

    pub async fn turn_off_key_management(
        &self,
        namespace: &str,
        delete_service: bool,
    ) -> OrchestratorResult<()> {
        self.turn_off_application(namespace, AppKind::Km, None, delete_service)
            .await
    }

    pub async fn turn_off_contract(
        &self,
        namespace: &str,
        delete_service: bool,
    ) -> OrchestratorResult<()> {
        self.turn_off_application(namespace, AppKind::Contract, None, delete_service)
            .await
    }
}
