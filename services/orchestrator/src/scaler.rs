//! Worker pool scaling.
//!
//! Scaling converges the number of `worker-{n}` deployments on a target by
//! creating or deleting one instance at a time. There is no atomicity across
//! the loop: an interrupted scale leaves an intermediate count, and running
//! the same scale again finishes the job since both create (upsert) and
//! delete are safe to repeat.

use std::path::{Path, PathBuf};

use fleet_naming::AppKind;
use rand::distr::Alphanumeric;
use rand::Rng;
use tracing::{info, instrument, warn};

use crate::error::OrchestratorResult;
use crate::manifest::{Deployment, Service};
use crate::Orchestrator;

/// Environment variable listing the bootstrap peers a node dials first.
pub const BOOTSTRAP_ADDRESS_ENV: &str = "BOOTSTRAP_ADDRESS";

/// What a scale call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaleOutcome {
    /// Indices of created workers, in creation order.
    pub created: Vec<u32>,

    /// Indices of deleted workers, in deletion order.
    pub deleted: Vec<u32>,
}

impl Orchestrator {
    /// Converge the worker count of `namespace` on `target`.
    ///
    /// A negative target is treated as zero.
    #[instrument(skip(self))]
    pub async fn scale_workers(
        &self,
        namespace: &str,
        target: i64,
        delete_services: bool,
    ) -> OrchestratorResult<ScaleOutcome> {
        if target < 0 {
            warn!(namespace, target, "Negative worker target, scaling to zero");
        }
        let target = usize::try_from(target).unwrap_or(0);

        let current = self.number_of_workers(namespace).await?;
        info!(namespace, current, target, "Scaling workers");

        let mut outcome = ScaleOutcome::default();

        if target > current {
            for _ in 0..target - current {
                let index = self.next_worker_index(namespace).await?;
                self.create_worker_instance(namespace, index).await?;
                outcome.created.push(index);
            }
        } else if target < current {
            for _ in 0..current - target {
                let Some(index) = self.random_existing_index(namespace).await? else {
                    warn!(namespace, "No workers left to delete");
                    break;
                };
                self.delete_worker(namespace, Some(index), delete_services)
                    .await?;
                outcome.deleted.push(index);
            }
        }

        info!(
            namespace,
            created = outcome.created.len(),
            deleted = outcome.deleted.len(),
            "Scaling complete"
        );
        Ok(outcome)
    }

    /// Scale the pool down to nothing.
    pub async fn turn_off_workers(
        &self,
        namespace: &str,
        delete_services: bool,
    ) -> OrchestratorResult<ScaleOutcome> {
        self.scale_workers(namespace, 0, delete_services).await
    }

    /// Create `worker-{index}` and its service.
    ///
    /// The deployment is submitted before the service. In debug mode both
    /// manifests are written to disk instead.
    #[instrument(skip(self))]
    pub async fn create_worker_instance(&self, namespace: &str, index: u32) -> OrchestratorResult<()> {
        let app = AppKind::Worker.deployment_name(Some(index));
        let templates = self.load_for_namespace(namespace, AppKind::Worker).await?;
        let bootstrap_address = self.bootstrap_connection_string(namespace).await?;

        let deployment = templates
            .deployment
            .with_app_name(&app)
            .with_env(BOOTSTRAP_ADDRESS_ENV, &bootstrap_address);
        let service = templates
            .service
            .with_app_name(&AppKind::Worker.service_name(Some(index)), &app);

        if let Some(base) = &self.config.debug_output {
            let dir = write_debug_manifests(base, &app, &deployment, &service).await?;
            info!(namespace, app = %app, dir = %dir.display(), "Wrote worker manifests (debug)");
            return Ok(());
        }

        self.control_plane
            .upsert_deployment(namespace, &deployment)
            .await?;
        self.control_plane.upsert_service(namespace, &service).await?;
        info!(namespace, app = %app, "Created worker");
        Ok(())
    }

    /// Comma-joined `BOOTSTRAP_ADDRESS` values of every bootstrap deployment.
    pub async fn bootstrap_connection_string(&self, namespace: &str) -> OrchestratorResult<String> {
        let prefix = AppKind::Bootstrap.prefix();
        let deployments = self.control_plane.list_deployments(namespace).await?;

        let addresses: Vec<&str> = deployments
            .iter()
            .filter(|dp| dp.metadata.name.starts_with(&prefix))
            .filter_map(|dp| {
                let address = dp.env_value(BOOTSTRAP_ADDRESS_ENV);
                if address.is_none() {
                    warn!(namespace, name = %dp.metadata.name, "Bootstrap deployment has no address");
                }
                address
            })
            .collect();

        Ok(addresses.join(","))
    }
}

async fn write_debug_manifests(
    base: &Path,
    app: &str,
    deployment: &Deployment,
    service: &Service,
) -> OrchestratorResult<PathBuf> {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    let dir = base.join(format!("{app}-{suffix}"));

    let dp_yaml = serde_yaml::to_string(deployment)?;
    let svc_yaml = serde_yaml::to_string(service)?;

    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(dir.join("dp.yaml"), dp_yaml).await?;
    tokio::fs::write(dir.join("svc.yaml"), svc_yaml).await?;
    Ok(dir)
}
