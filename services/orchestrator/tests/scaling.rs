//! Integration tests for worker scaling and single-worker controls.
//!
//! Runs the orchestrator over the in-memory control plane and checks the
//! resulting deployments and services.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{orchestrator, orchestrator_with, test_config, NS, PEERS};
use fleet_orchestrator::allocator::used_worker_indices;
use fleet_orchestrator::manifest::AGENT_POOL_KEY;
use fleet_orchestrator::mock::MockCall;
use fleet_orchestrator::{MockControlPlane, OrchestratorError, SgxMode};

async fn worker_indices(cp: &MockControlPlane) -> BTreeSet<u32> {
    let names = cp.deployment_names(NS).await;
    used_worker_indices(names.iter().map(String::as_str))
}

#[tokio::test]
async fn test_scale_up_fills_gaps_first() {
    let cp = Arc::new(MockControlPlane::new());
    let orch = orchestrator(cp.clone());

    orch.create_worker_instance(NS, 1).await.unwrap();
    orch.create_worker_instance(NS, 3).await.unwrap();

    let outcome = orch.scale_workers(NS, 5, false).await.unwrap();

    assert_eq!(outcome.created, vec![2, 4, 5]);
    assert!(outcome.deleted.is_empty());
    assert_eq!(worker_indices(&cp).await, BTreeSet::from([1, 2, 3, 4, 5]));
    assert_eq!(orch.number_of_workers(NS).await.unwrap(), 5);

    let services: BTreeSet<String> = cp.service_names(NS).await.into_iter().collect();
    for index in 1..=5 {
        assert!(services.contains(&format!("worker-{index}-service")));
    }
}

#[tokio::test]
async fn test_scale_down_deletes_existing_workers() {
    let cp = Arc::new(MockControlPlane::new());
    let orch = orchestrator(cp.clone());

    orch.scale_workers(NS, 5, false).await.unwrap();
    let before = worker_indices(&cp).await;

    let outcome = orch.scale_workers(NS, 2, true).await.unwrap();

    let deleted: BTreeSet<u32> = outcome.deleted.iter().copied().collect();
    assert_eq!(outcome.deleted.len(), 3);
    assert_eq!(deleted.len(), 3, "deleted indices must be distinct");
    assert!(deleted.is_subset(&before));

    let after = worker_indices(&cp).await;
    assert_eq!(after.len(), 2);
    assert!(after.is_disjoint(&deleted));
    assert_eq!(cp.service_names(NS).await.len(), 2);
}

#[tokio::test]
async fn test_scale_to_current_count_is_noop() {
    let cp = Arc::new(MockControlPlane::new());
    let orch = orchestrator(cp.clone());

    orch.scale_workers(NS, 2, false).await.unwrap();
    let calls_before = cp.calls().await.len();

    let outcome = orch.scale_workers(NS, 2, false).await.unwrap();
    assert!(outcome.created.is_empty() && outcome.deleted.is_empty());
    assert_eq!(cp.calls().await.len(), calls_before);
}

#[tokio::test]
async fn test_negative_target_scales_to_zero() {
    let cp = Arc::new(MockControlPlane::new());
    let orch = orchestrator(cp.clone());

    orch.scale_workers(NS, 3, false).await.unwrap();
    let outcome = orch.scale_workers(NS, -4, false).await.unwrap();

    assert_eq!(outcome.deleted.len(), 3);
    assert!(worker_indices(&cp).await.is_empty());
    // services are kept unless asked
    assert_eq!(cp.service_names(NS).await.len(), 3);
}

#[tokio::test]
async fn test_worker_manifest_follows_sgx_mode() {
    let cp = Arc::new(MockControlPlane::new());
    let orch = orchestrator(cp.clone());

    orch.set_sgx_mode(NS, SgxMode::Hw).await;
    orch.create_worker_instance(NS, 1).await.unwrap();

    let dp = cp.deployment(NS, "worker-1").await.unwrap();
    let container = dp.primary_container().unwrap();
    assert_eq!(container.image, "registry.example/worker_hw:v1");
    assert_eq!(dp.env_value("SGX_MODE"), Some("HW"));
    assert_eq!(
        dp.spec.template.spec.node_selector.get(AGENT_POOL_KEY).map(String::as_str),
        Some("sgxpool")
    );
    assert!(dp.spec.template.spec.volumes.iter().any(|v| v.name == "dev-sgx"));

    // other namespaces stay in SW
    assert_eq!(orch.sgx_mode("other").await, SgxMode::Sw);
}

#[tokio::test]
async fn test_workers_get_bootstrap_connection_string() {
    let cp = Arc::new(MockControlPlane::new());
    let orch = orchestrator(cp.clone());

    let assignments = orch.create_bootstraps(NS).await.unwrap();
    orch.create_worker_instance(NS, 1).await.unwrap();

    let expected: Vec<&str> = assignments.iter().map(|a| a.address.as_str()).collect();
    let dp = cp.deployment(NS, "worker-1").await.unwrap();
    assert_eq!(dp.env_value("BOOTSTRAP_ADDRESS"), Some(expected.join(",").as_str()));
}

#[tokio::test]
async fn test_debug_mode_writes_manifests() {
    let dir = tempfile::tempdir().unwrap();
    let cp = Arc::new(MockControlPlane::new());
    let mut config = test_config();
    config.debug_output = Some(dir.path().to_path_buf());
    let orch = orchestrator_with(cp.clone(), &PEERS, config);

    orch.create_worker_instance(NS, 1).await.unwrap();

    assert!(cp.deployment_names(NS).await.is_empty());
    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1);

    let name = entries[0].file_name().unwrap().to_string_lossy().into_owned();
    let suffix = name.strip_prefix("worker-1-").unwrap();
    assert_eq!(suffix.len(), 6);
    assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));

    let dp = std::fs::read_to_string(entries[0].join("dp.yaml")).unwrap();
    let svc = std::fs::read_to_string(entries[0].join("svc.yaml")).unwrap();
    assert!(dp.contains("name: worker-1"));
    assert!(svc.contains("name: worker-1-service"));
}

#[tokio::test]
async fn test_restart_worker_replaces_pod() {
    let cp = Arc::new(MockControlPlane::new());
    let orch = orchestrator(cp.clone());
    orch.create_worker_instance(NS, 1).await.unwrap();
    orch.create_worker_instance(NS, 10).await.unwrap();

    let index = orch.restart_worker(NS, Some(1)).await.unwrap();
    assert_eq!(index, 1);

    let deleted: Vec<String> = cp
        .calls()
        .await
        .into_iter()
        .filter_map(|call| match call {
            MockCall::DeletePod { name, .. } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].starts_with("worker-1-"));
    assert!(!deleted[0].starts_with("worker-10-"));
}

#[tokio::test]
async fn test_delete_worker_without_workers() {
    let cp = Arc::new(MockControlPlane::new());
    let orch = orchestrator(cp.clone());

    let err = orch.delete_worker(NS, None, true).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NoWorkers { .. }));

    orch.create_worker_instance(NS, 4).await.unwrap();
    assert_eq!(orch.delete_worker(NS, None, true).await.unwrap(), 4);
    assert!(cp.service_names(NS).await.is_empty());
}
