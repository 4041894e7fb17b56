//! Fleet status and the per-namespace status cache.
//!
//! Computing status costs one exec per worker, so callers that poll can
//! enable a cache: a background task recomputes the namespace's status every
//! refresh interval and readers asking `from_cache` get the last snapshot.
//! The first snapshot lands one interval after the cache is enabled; until
//! then cached reads fall through to a live computation.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use fleet_naming::{AppKind, SERVICE_SUFFIX};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::error::OrchestratorResult;
use crate::Orchestrator;

/// Observed state of one deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Load-balancer IP of the deployment's service; empty when none.
    pub external_ip: String,

    /// Worker identity; only populated for workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethereum_address: Option<String>,
}

/// Deployment name → status, ordered by name.
pub type FleetStatus = BTreeMap<String, ResourceStatus>;

/// Snapshots and refresh tasks, keyed by namespace.
#[derive(Default)]
pub(crate) struct StatusCache {
    snapshots: RwLock<HashMap<String, FleetStatus>>,
    refreshers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Orchestrator {
    /// Status of every deployment in `namespace`.
    ///
    /// With `from_cache`, the cached snapshot is returned when one exists.
    pub async fn get_status(
        &self,
        namespace: &str,
        from_cache: bool,
    ) -> OrchestratorResult<FleetStatus> {
        if from_cache {
            if let Some(snapshot) = self.cache.snapshots.read().await.get(namespace) {
                debug!(namespace, "Serving status from cache");
                return Ok(snapshot.clone());
            }
        }
        self.compute_status(namespace).await
    }

    /// Compute status directly from the control plane.
    #[instrument(skip(self))]
    pub async fn compute_status(&self, namespace: &str) -> OrchestratorResult<FleetStatus> {
        let deployments = self.control_plane.list_deployments(namespace).await?;
        let services: HashMap<String, String> = self
            .control_plane
            .list_services(namespace)
            .await?
            .into_iter()
            .filter_map(|svc| {
                let ip = svc.external_ip()?.to_string();
                Some((svc.metadata.name, ip))
            })
            .collect();

        let worker_prefix = AppKind::Worker.prefix();
        let mut status = FleetStatus::new();

        for dp in deployments {
            let name = dp.metadata.name;
            let external_ip = services
                .get(&format!("{name}{SERVICE_SUFFIX}"))
                .cloned()
                .unwrap_or_default();

            let ethereum_address = if name.starts_with(&worker_prefix) {
                match self.get_worker_ethereum_address(namespace, &name).await {
                    Ok(address) => Some(address.trim().to_string()).filter(|a| !a.is_empty()),
                    Err(e) => {
                        warn!(namespace, deployment = %name, error = %e, "Failed to read worker identity");
                        None
                    }
                }
            } else {
                None
            };

            status.insert(
                name,
                ResourceStatus {
                    external_ip,
                    ethereum_address,
                },
            );
        }

        Ok(status)
    }

    /// Start refreshing the status of `namespace` in the background.
    ///
    /// Returns false if a refresh task was already running.
    pub async fn enable_cache(&self, namespace: &str) -> bool {
        let mut refreshers = self.cache.refreshers.lock().await;
        if refreshers.contains_key(namespace) {
            debug!(namespace, "Status cache already enabled");
            return false;
        }

        let period = self.config.cache_refresh_interval;
        let this = self.clone();
        let ns = namespace.to_string();
        let handle = tokio::spawn(async move { this.refresh_status_loop(ns, period).await });
        refreshers.insert(namespace.to_string(), handle);

        info!(
            namespace,
            interval_ms = period.as_millis() as u64,
            "Status cache enabled"
        );
        true
    }

    /// Stop the refresh task and drop the snapshot.
    ///
    /// The task has fully stopped before the snapshot is dropped, so an
    /// in-flight refresh cannot write it back. Returns false if caching was
    /// not enabled.
    pub async fn disable_cache(&self, namespace: &str) -> bool {
        let Some(handle) = self.cache.refreshers.lock().await.remove(namespace) else {
            return false;
        };
        handle.abort();
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                warn!(namespace, error = %e, "Status refresh task panicked");
            }
        }
        self.cache.snapshots.write().await.remove(namespace);

        info!(namespace, "Status cache disabled");
        true
    }

    pub async fn is_cache_enabled(&self, namespace: &str) -> bool {
        self.cache.refreshers.lock().await.contains_key(namespace)
    }

    async fn refresh_status_loop(self, namespace: String, period: Duration) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.compute_status(&namespace).await {
                Ok(snapshot) => {
                    debug!(namespace = %namespace, deployments = snapshot.len(), "Refreshed status cache");
                    self.cache
                        .snapshots
                        .write()
                        .await
                        .insert(namespace.clone(), snapshot);
                }
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Status refresh failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_status_json_shape() {
        let mut status = FleetStatus::new();
        status.insert(
            "worker-1".to_string(),
            ResourceStatus {
                external_ip: "52.0.0.1".to_string(),
                ethereum_address: Some("0xabc".to_string()),
            },
        );
        status.insert("km".to_string(), ResourceStatus::default());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "km": { "externalIp": "" },
                "worker-1": { "externalIp": "52.0.0.1", "ethereumAddress": "0xabc" }
            })
        );
    }
}
