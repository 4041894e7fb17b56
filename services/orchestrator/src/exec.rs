//! Remote command execution inside application pods.
//!
//! Worker containers run two supervised processes, `core` and `p2p`; the
//! network side is stopped first and started last so `core` never runs
//! unreachable by peers it already announced to.

use fleet_naming::AppKind;
use tracing::{debug, info, instrument};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::Orchestrator;

/// In-pod file holding a worker's public identity.
pub const WORKER_IDENTITY_FILE: &str = "./p2p/id_rsa.pub";

/// Application config file, relative to an optional sub-directory.
pub const CONFIG_FILE: &str = "config/k8s_config.json";

const STOP_SEQUENCE: [&str; 2] = ["supervisorctl stop p2p", "supervisorctl stop core"];
const START_SEQUENCE: [&str; 2] = ["supervisorctl start core", "supervisorctl start p2p"];

/// Path of the config file for an optional sub-directory.
pub fn config_file_path(sub_path: Option<&str>) -> String {
    match sub_path.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(sub) => format!("./{sub}/{CONFIG_FILE}"),
        None => format!("./{CONFIG_FILE}"),
    }
}

impl Orchestrator {
    /// Run `command` in the pod's primary container and return its stdout.
    ///
    /// The command is split on whitespace; no shell is involved.
    pub async fn exec(&self, namespace: &str, pod: &str, command: &str) -> OrchestratorResult<String> {
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        debug!(namespace, pod, command, "Executing in pod");
        Ok(self.control_plane.exec(namespace, pod, &argv).await?)
    }

    /// Name of the first pod created by `deployment`.
    pub async fn resolve_pod(&self, namespace: &str, deployment: &str) -> OrchestratorResult<String> {
        self.control_plane
            .list_pods(namespace)
            .await?
            .into_iter()
            .find(|pod| pod.belongs_to(deployment))
            .map(|pod| pod.metadata.name)
            .ok_or_else(|| OrchestratorError::PodNotFound {
                namespace: namespace.to_string(),
                deployment: deployment.to_string(),
            })
    }

    /// Run `command` in the first pod of `deployment`.
    pub async fn exec_in_deployment(
        &self,
        namespace: &str,
        deployment: &str,
        command: &str,
    ) -> OrchestratorResult<String> {
        let pod = self.resolve_pod(namespace, deployment).await?;
        self.exec(namespace, &pod, command).await
    }

    /// Deployment addressed by an optional kind and index.
    ///
    /// Kind defaults to worker; a worker without an index is picked at random.
    pub(crate) async fn target_deployment(
        &self,
        namespace: &str,
        kind: Option<AppKind>,
        index: Option<u32>,
    ) -> OrchestratorResult<(AppKind, String)> {
        let kind = kind.unwrap_or(AppKind::Worker);
        let index = match (kind, index) {
            (AppKind::Worker, None) => Some(self.resolve_worker_index(namespace, None).await?),
            (_, index) => index,
        };
        Ok((kind, kind.deployment_name(index)))
    }

    /// Stop the supervised processes of an application pod.
    #[instrument(skip(self))]
    pub async fn stop_worker_process(
        &self,
        namespace: &str,
        kind: Option<AppKind>,
        index: Option<u32>,
    ) -> OrchestratorResult<()> {
        self.run_sequence(namespace, kind, index, &STOP_SEQUENCE).await
    }

    /// Start the supervised processes of an application pod.
    #[instrument(skip(self))]
    pub async fn start_worker_process(
        &self,
        namespace: &str,
        kind: Option<AppKind>,
        index: Option<u32>,
    ) -> OrchestratorResult<()> {
        self.run_sequence(namespace, kind, index, &START_SEQUENCE).await
    }

    async fn run_sequence(
        &self,
        namespace: &str,
        kind: Option<AppKind>,
        index: Option<u32>,
        commands: &[&str],
    ) -> OrchestratorResult<()> {
        let (_, deployment) = self.target_deployment(namespace, kind, index).await?;
        let pod = self.resolve_pod(namespace, &deployment).await?;

        for command in commands {
            let output = self.exec(namespace, &pod, command).await?;
            info!(namespace, pod = %pod, command, output = %output.trim(), "Ran supervisor command");
        }
        Ok(())
    }

    /// Read and parse an application's in-pod JSON config file.
    #[instrument(skip(self))]
    pub async fn get_application_internal_config_file(
        &self,
        namespace: &str,
        kind: Option<AppKind>,
        index: Option<u32>,
        sub_path: Option<&str>,
    ) -> OrchestratorResult<serde_json::Value> {
        let (app, deployment) = self.target_deployment(namespace, kind, index).await?;
        let command = format!("cat {}", config_file_path(sub_path));

        let raw = self
            .exec_in_deployment(namespace, &deployment, &command)
            .await?;
        serde_json::from_str(&raw).map_err(|source| OrchestratorError::InvalidConfigFile { app, source })
    }

    /// Raw public identity of a worker.
    pub async fn get_worker_ethereum_address(
        &self,
        namespace: &str,
        deployment: &str,
    ) -> OrchestratorResult<String> {
        self.exec_in_deployment(namespace, deployment, &format!("cat {WORKER_IDENTITY_FILE}"))
            .await
    }
}
