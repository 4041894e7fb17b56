//! Shared fixtures for orchestrator integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fleet_naming::AppKind;
use fleet_orchestrator::config::OrchestratorConfig;
use fleet_orchestrator::{MockControlPlane, Orchestrator, StaticPeerSource, StaticTemplateStore};
use fleet_reconcile::RetryPolicy;

pub const NS: &str = "fleet-test";

pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

pub const PEERS: [&str; 3] = [
    "/ip4/10.1.0.1/tcp/10300/ipfs/QmSeedOne",
    "/ip4/10.1.0.2/tcp/10300/ipfs/QmSeedTwo",
    "/ip4/10.1.0.3/tcp/10300/ipfs/QmSeedThree",
];

/// Deployment + service template in the layout of the deployment repo.
pub fn template_yaml(app: &str) -> String {
    format!(
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {app}
  labels:
    app: {app}
spec:
  replicas: 1
  selector:
    matchLabels:
      app: {app}
  template:
    metadata:
      labels:
        app: {app}
    spec:
      containers:
        - name: {app}
          image: registry.example/{app}_sw:v1
          env:
            - name: SGX_MODE
              value: SW
          volumeMounts:
            - name: dev-sgx
              mountPath: /dev/sgx
          ports:
            - containerPort: 10300
      volumes:
        - name: dev-sgx
          hostPath:
            path: /dev/sgx
---
apiVersion: v1
kind: Service
metadata:
  name: {app}-service
spec:
  type: LoadBalancer
  selector:
    app: {app}
  ports:
    - port: 10300
"#
    )
}

pub fn templates() -> StaticTemplateStore {
    [AppKind::Worker, AppKind::Bootstrap, AppKind::Km, AppKind::Contract]
        .into_iter()
        .fold(StaticTemplateStore::new(), |store, app| {
            store
                .with_yaml(app, &template_yaml(&app.prefix()))
                .unwrap()
        })
}

/// Orchestration settings with bounded polls so a stuck test fails.
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.bootstrap.address_poll = RetryPolicy::unbounded(POLL_INTERVAL).with_max_attempts(20);
    config.deletion_poll = RetryPolicy::unbounded(POLL_INTERVAL).with_max_attempts(20);
    config
}

pub fn orchestrator_with(
    control_plane: Arc<MockControlPlane>,
    peers: &[&str],
    config: OrchestratorConfig,
) -> Orchestrator {
    Orchestrator::new(
        control_plane,
        Arc::new(templates()),
        Arc::new(StaticPeerSource::new(peers.iter().copied())),
        config,
    )
}

pub fn orchestrator(control_plane: Arc<MockControlPlane>) -> Orchestrator {
    orchestrator_with(control_plane, &PEERS, test_config())
}
