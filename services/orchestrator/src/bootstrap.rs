//! Bootstrap (seed node) discovery.
//!
//! Seed nodes must advertise an address that embeds both their public IP,
//! which only exists once the control plane provisions their load balancer,
//! and their peer identity, which is published externally. Discovery runs in
//! order:
//!
//! 1. Create `bootstrap-{i}-service` for every seed, without deployments.
//! 2. Poll until every one of those services reports an external IP.
//! 3. Fetch the published peer list; entry `i-1` belongs to seed `i`.
//! 4. Build `/ip4/{ip}/tcp/{port}/ipfs/{peer id}` per seed.
//! 5. Create `bootstrap-{i}` with `BOOTSTRAP_ID` and `BOOTSTRAP_ADDRESS`.
//!
//! Step 2 only finishes once all seeds have an address; a single stuck
//! service blocks discovery unless the poll policy is bounded.

use std::collections::BTreeMap;

use fleet_naming::{parse_indexed_name, AppKind, SERVICE_SUFFIX};
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::peers::peer_identity;
use crate::scaler::BOOTSTRAP_ADDRESS_ENV;
use crate::Orchestrator;

/// Environment variable naming a seed node (`B1`, `B2`, ...).
pub const BOOTSTRAP_ID_ENV: &str = "BOOTSTRAP_ID";

/// Address and identity assigned to one seed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapAssignment {
    pub index: u32,
    pub external_ip: String,
    pub peer_id: String,
    pub address: String,
}

/// libp2p multiaddress of a seed node.
pub fn bootstrap_address(ip: &str, port: u16, peer_id: &str) -> String {
    format!("/ip4/{ip}/tcp/{port}/ipfs/{peer_id}")
}

impl Orchestrator {
    /// Provision the seed nodes of `namespace`.
    #[instrument(skip(self))]
    pub async fn create_bootstraps(
        &self,
        namespace: &str,
    ) -> OrchestratorResult<Vec<BootstrapAssignment>> {
        let settings = &self.config.bootstrap;
        let templates = self.load_for_namespace(namespace, AppKind::Bootstrap).await?;

        for index in 1..=settings.count {
            let service = templates.service.clone().with_app_name(
                &AppKind::Bootstrap.service_name(Some(index)),
                &AppKind::Bootstrap.deployment_name(Some(index)),
            );
            self.control_plane.upsert_service(namespace, &service).await?;
        }

        let ips = settings
            .address_poll
            .poll_until("bootstrap service addresses", || {
                self.observe_bootstrap_addresses(namespace)
            })
            .await?;

        let peers = self.peers.fetch_peer_addresses().await?;
        if peers.len() != settings.count as usize {
            return Err(OrchestratorError::PeerCountMismatch {
                expected: settings.count as usize,
                actual: peers.len(),
            });
        }

        let mut assignments = Vec::with_capacity(peers.len());
        for (index, entry) in (1..=settings.count).zip(&peers) {
            let external_ip = ips
                .get(&index)
                .cloned()
                .ok_or(OrchestratorError::ServiceNotReady { index })?;
            let peer_id = peer_identity(entry)
                .ok_or_else(|| OrchestratorError::MalformedPeerAddress(entry.clone()))?
                .to_string();
            let address = bootstrap_address(&external_ip, settings.port, &peer_id);

            let app = AppKind::Bootstrap.deployment_name(Some(index));
            let deployment = templates
                .deployment
                .clone()
                .with_env(BOOTSTRAP_ID_ENV, &format!("B{index}"))
                .with_env(BOOTSTRAP_ADDRESS_ENV, &address)
                .with_app_name(&app);
            self.control_plane
                .upsert_deployment(namespace, &deployment)
                .await?;

            info!(namespace, app = %app, address = %address, "Created bootstrap");
            assignments.push(BootstrapAssignment {
                index,
                external_ip,
                peer_id,
                address,
            });
        }

        Ok(assignments)
    }

    /// External IPs of the seed services, once all of them have one.
    async fn observe_bootstrap_addresses(
        &self,
        namespace: &str,
    ) -> OrchestratorResult<Option<BTreeMap<u32, String>>> {
        let count = self.config.bootstrap.count;
        let prefix = AppKind::Bootstrap.prefix();
        let services = self.control_plane.list_services(namespace).await?;

        let observed: BTreeMap<u32, String> = services
            .iter()
            .filter_map(|svc| {
                let name = svc.metadata.name.strip_suffix(SERVICE_SUFFIX)?;
                let index = parse_indexed_name(&prefix, name)?;
                Some((index, svc.external_ip()?.to_string()))
            })
            .filter(|(index, _)| (1..=count).contains(index))
            .collect();

        if observed.len() == count as usize {
            return Ok(Some(observed));
        }

        info!(
            namespace,
            ready = observed.len(),
            expected = count,
            "Waiting for bootstrap services to get a public address"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_address() {
        assert_eq!(
            bootstrap_address("52.1.2.3", 10300, "QmPeer"),
            "/ip4/52.1.2.3/tcp/10300/ipfs/QmPeer"
        );
    }
}
