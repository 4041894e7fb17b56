//! In-memory control plane.
//!
//! Behaves like a small API server for tests and dry runs:
//! - Creating a deployment starts one pod named `{deployment}-{hash}-{suffix}`
//! - Deleting a pod that belongs to a deployment starts a replacement
//! - Services get a `clusterIP` and, unless disabled, a load-balancer IP
//! - Replacing with a stale `resourceVersion` or a changed `clusterIP` fails
//! - A deleted namespace keeps being listed for a configurable number of
//!   `list_namespaces` calls, like one stuck in `Terminating`
//!
//! Every mutating verb and every exec is appended to a call log.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::client::{ClientError, ClientResult, ControlPlane};
use crate::manifest::{
    Deployment, LoadBalancerIngress, LoadBalancerStatus, Namespace, ObjectMeta, Pod, Service,
    ServiceStatus,
};

/// A recorded control-plane request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateNamespace(String),
    DeleteNamespace(String),
    CreateDeployment { namespace: String, name: String },
    ReplaceDeployment { namespace: String, name: String },
    DeleteDeployment { namespace: String, name: String },
    CreateService { namespace: String, name: String },
    ReplaceService { namespace: String, name: String },
    DeleteService { namespace: String, name: String },
    DeletePod { namespace: String, name: String },
    Exec { namespace: String, pod: String, command: String },
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct MockState {
    /// Namespace → remaining listings while terminating.
    namespaces: BTreeMap<String, Option<u32>>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    /// Pod → owning deployment.
    pods: BTreeMap<Key, String>,
    exec_replies: HashMap<String, Result<String, String>>,
    calls: Vec<MockCall>,
    counter: u64,
}

impl MockState {
    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn start_pod(&mut self, namespace: &str, deployment: &str) -> String {
        let n = self.next();
        let name = format!("{deployment}-{:08x}-{n:05}", n.wrapping_mul(0x9e37_79b9));
        self.pods.insert(key(namespace, &name), deployment.to_string());
        debug!(namespace, pod = %name, "[MOCK] Pod started");
        name
    }

    fn drop_namespace_contents(&mut self, namespace: &str) {
        self.deployments.retain(|(ns, _), _| ns != namespace);
        self.services.retain(|(ns, _), _| ns != namespace);
        self.pods.retain(|(ns, _), _| ns != namespace);
    }
}

/// In-memory [`ControlPlane`].
pub struct MockControlPlane {
    state: Mutex<MockState>,

    /// Listings a deleted namespace survives.
    namespace_linger: u32,

    /// Whether services get a load-balancer IP on creation.
    assign_load_balancer_ips: bool,
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            namespace_linger: 0,
            assign_load_balancer_ips: true,
        }
    }

    /// Keep deleted namespaces listed for `polls` more `list_namespaces` calls.
    pub fn with_namespace_linger(mut self, polls: u32) -> Self {
        self.namespace_linger = polls;
        self
    }

    /// Leave new services without an external IP until
    /// [`set_service_ip`](Self::set_service_ip) is called.
    pub fn without_load_balancer(mut self) -> Self {
        self.assign_load_balancer_ips = false;
        self
    }

    /// Reply to `command` (space-joined argv) with `output` in every pod.
    pub fn with_exec_reply(mut self, command: &str, output: &str) -> Self {
        self.state
            .get_mut()
            .exec_replies
            .insert(command.to_string(), Ok(output.to_string()));
        self
    }

    /// Make `command` fail in every pod.
    pub fn with_exec_failure(mut self, command: &str, message: &str) -> Self {
        self.state
            .get_mut()
            .exec_replies
            .insert(command.to_string(), Err(message.to_string()));
        self
    }

    /// Requests received so far, in order.
    pub async fn calls(&self) -> Vec<MockCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state
            .lock()
            .await
            .deployments
            .get(&key(namespace, name))
            .cloned()
    }

    pub async fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state
            .lock()
            .await
            .services
            .get(&key(namespace, name))
            .cloned()
    }

    pub async fn deployment_names(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .deployments
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub async fn service_names(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .services
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Publish a load-balancer IP on an existing service.
    pub async fn set_service_ip(&self, namespace: &str, name: &str, ip: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(service) = state.services.get_mut(&key(namespace, name)) else {
            return false;
        };
        service.status = Some(load_balancer_status(ip));
        true
    }
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

fn load_balancer_status(ip: &str) -> ServiceStatus {
    ServiceStatus {
        load_balancer: LoadBalancerStatus {
            ingress: vec![LoadBalancerIngress {
                ip: Some(ip.to_string()),
                hostname: None,
            }],
        },
    }
}

fn not_found(kind: &'static str, name: &str) -> ClientError {
    ClientError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn already_exists(kind: &'static str, name: &str) -> ClientError {
    ClientError::AlreadyExists {
        kind,
        name: name.to_string(),
    }
}

fn conflict(message: String) -> ClientError {
    ClientError::Api {
        status: 409,
        body: message,
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn create_namespace(&self, namespace: &Namespace) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        let name = &namespace.metadata.name;
        state.calls.push(MockCall::CreateNamespace(name.clone()));

        if state.namespaces.contains_key(name) {
            return Err(already_exists("namespace", name));
        }
        state.namespaces.insert(name.clone(), None);
        info!(namespace = %name, "[MOCK] Namespace created");
        Ok(())
    }

    async fn list_namespaces(&self) -> ClientResult<Vec<Namespace>> {
        let mut state = self.state.lock().await;
        let listed: Vec<Namespace> = state.namespaces.keys().map(|n| Namespace::named(n)).collect();

        for remaining in state.namespaces.values_mut().flatten() {
            *remaining = remaining.saturating_sub(1);
        }
        state
            .namespaces
            .retain(|_, remaining| *remaining != Some(0));

        Ok(listed)
    }

    async fn delete_namespace(&self, name: &str) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(MockCall::DeleteNamespace(name.to_string()));

        if !state.namespaces.contains_key(name) {
            return Err(not_found("namespace", name));
        }
        state.drop_namespace_contents(name);
        if self.namespace_linger == 0 {
            state.namespaces.remove(name);
        } else {
            state
                .namespaces
                .insert(name.to_string(), Some(self.namespace_linger));
        }
        info!(namespace = %name, linger = self.namespace_linger, "[MOCK] Namespace deleted");
        Ok(())
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        let name = deployment.metadata.name.clone();
        state.calls.push(MockCall::CreateDeployment {
            namespace: namespace.to_string(),
            name: name.clone(),
        });

        let k = key(namespace, &name);
        if state.deployments.contains_key(&k) {
            return Err(already_exists("deployment", &name));
        }

        let mut stored = deployment.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(state.next().to_string());
        state.deployments.insert(k, stored);
        state.start_pod(namespace, &name);

        info!(namespace, name = %name, "[MOCK] Deployment created");
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> ClientResult<Deployment> {
        self.state
            .lock()
            .await
            .deployments
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("deployment", name))
    }

    async fn replace_deployment(&self, namespace: &str, deployment: &Deployment) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        let name = deployment.metadata.name.clone();
        state.calls.push(MockCall::ReplaceDeployment {
            namespace: namespace.to_string(),
            name: name.clone(),
        });

        let k = key(namespace, &name);
        let current = state
            .deployments
            .get(&k)
            .ok_or_else(|| not_found("deployment", &name))?
            .metadata
            .resource_version
            .clone();
        if deployment.metadata.resource_version.is_some()
            && deployment.metadata.resource_version != current
        {
            return Err(conflict(format!("deployment '{name}' was modified")));
        }

        let mut stored = deployment.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(state.next().to_string());
        state.deployments.insert(k, stored);

        info!(namespace, name = %name, "[MOCK] Deployment replaced");
        Ok(())
    }

    async fn list_deployments(&self, namespace: &str) -> ClientResult<Vec<Deployment>> {
        Ok(self
            .state
            .lock()
            .await
            .deployments
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, dp)| dp.clone())
            .collect())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(MockCall::DeleteDeployment {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });

        if state.deployments.remove(&key(namespace, name)).is_none() {
            return Err(not_found("deployment", name));
        }
        state
            .pods
            .retain(|(ns, _), owner| !(ns == namespace && owner == name));

        info!(namespace, name, "[MOCK] Deployment deleted");
        Ok(())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        let name = service.metadata.name.clone();
        state.calls.push(MockCall::CreateService {
            namespace: namespace.to_string(),
            name: name.clone(),
        });

        let k = key(namespace, &name);
        if state.services.contains_key(&k) {
            return Err(already_exists("service", &name));
        }

        let n = state.next();
        let mut stored = service.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(n.to_string());
        stored.spec.cluster_ip = Some(format!("10.0.{}.{}", (n >> 8) & 0xff, n & 0xff));
        stored.status = self
            .assign_load_balancer_ips
            .then(|| load_balancer_status(&format!("52.0.{}.{}", (n >> 8) & 0xff, n & 0xff)));
        state.services.insert(k, stored);

        info!(namespace, name = %name, "[MOCK] Service created");
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> ClientResult<Service> {
        self.state
            .lock()
            .await
            .services
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("service", name))
    }

    async fn replace_service(&self, namespace: &str, service: &Service) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        let name = service.metadata.name.clone();
        state.calls.push(MockCall::ReplaceService {
            namespace: namespace.to_string(),
            name: name.clone(),
        });

        let k = key(namespace, &name);
        let existing = state
            .services
            .get(&k)
            .ok_or_else(|| not_found("service", &name))?;
        if service.spec.cluster_ip != existing.spec.cluster_ip {
            return Err(ClientError::Api {
                status: 422,
                body: format!("service '{name}': spec.clusterIP is immutable"),
            });
        }
        if service.metadata.resource_version != existing.metadata.resource_version {
            return Err(conflict(format!("service '{name}' was modified")));
        }

        let status = existing.status.clone();
        let mut stored = service.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(state.next().to_string());
        stored.status = status;
        state.services.insert(k, stored);

        info!(namespace, name = %name, "[MOCK] Service replaced");
        Ok(())
    }

    async fn list_services(&self, namespace: &str) -> ClientResult<Vec<Service>> {
        Ok(self
            .state
            .lock()
            .await
            .services
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, svc)| svc.clone())
            .collect())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(MockCall::DeleteService {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });

        if state.services.remove(&key(namespace, name)).is_none() {
            return Err(not_found("service", name));
        }
        info!(namespace, name, "[MOCK] Service deleted");
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> ClientResult<Vec<Pod>> {
        Ok(self
            .state
            .lock()
            .await
            .pods
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| Pod {
                metadata: ObjectMeta {
                    name: name.clone(),
                    namespace: Some(namespace.to_string()),
                    ..ObjectMeta::default()
                },
                status: None,
            })
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(MockCall::DeletePod {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });

        let owner = state
            .pods
            .remove(&key(namespace, name))
            .ok_or_else(|| not_found("pod", name))?;
        info!(namespace, name, "[MOCK] Pod deleted");

        if state.deployments.contains_key(&key(namespace, &owner)) {
            state.start_pod(namespace, &owner);
        }
        Ok(())
    }

    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> ClientResult<String> {
        let mut state = self.state.lock().await;
        let joined = command.join(" ");
        state.calls.push(MockCall::Exec {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            command: joined.clone(),
        });

        if !state.pods.contains_key(&key(namespace, pod)) {
            return Err(not_found("pod", pod));
        }
        debug!(namespace, pod, command = %joined, "[MOCK] Exec");

        match state.exec_replies.get(&joined) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(message)) => Err(ClientError::Exec(message.clone())),
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::worker_template;

    #[tokio::test]
    async fn test_deployment_starts_pod() {
        let cp = MockControlPlane::new();
        let dp = worker_template().with_app_name("worker-1");

        cp.create_deployment("ns", &dp).await.unwrap();
        let pods = cp.list_pods("ns").await.unwrap();
        assert_eq!(pods.len(), 1);
        assert!(pods[0].belongs_to("worker-1"));

        let err = cp.create_deployment("ns", &dp).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_deleted_pod_is_replaced() {
        let cp = MockControlPlane::new();
        cp.create_deployment("ns", &worker_template().with_app_name("worker-1"))
            .await
            .unwrap();
        let before = cp.list_pods("ns").await.unwrap()[0].metadata.name.clone();

        cp.delete_pod("ns", &before).await.unwrap();
        let after = cp.list_pods("ns").await.unwrap();
        assert_eq!(after.len(), 1);
        assert_ne!(after[0].metadata.name, before);
        assert!(after[0].belongs_to("worker-1"));
    }

    #[tokio::test]
    async fn test_stale_replace_is_rejected() {
        let cp = MockControlPlane::new();
        let dp = worker_template().with_app_name("worker-1");
        cp.create_deployment("ns", &dp).await.unwrap();

        let mut stale = dp.clone();
        stale.metadata.resource_version = Some("stale".to_string());
        let err = cp.replace_deployment("ns", &stale).await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 409, .. }));

        cp.upsert_deployment("ns", &dp).await.unwrap();
    }

    #[tokio::test]
    async fn test_namespace_linger() {
        let cp = MockControlPlane::new().with_namespace_linger(2);
        cp.ensure_namespace("ns").await.unwrap();
        cp.delete_namespace("ns").await.unwrap();

        assert_eq!(cp.list_namespaces().await.unwrap().len(), 1);
        assert_eq!(cp.list_namespaces().await.unwrap().len(), 1);
        assert!(cp.list_namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exec_replies() {
        let cp = MockControlPlane::new()
            .with_exec_reply("cat ./p2p/id_rsa.pub", "0xabc\n")
            .with_exec_failure("supervisorctl stop core", "exit 1");
        cp.create_deployment("ns", &worker_template().with_app_name("worker-1"))
            .await
            .unwrap();
        let pod = cp.list_pods("ns").await.unwrap()[0].metadata.name.clone();

        let argv = |s: &str| s.split(' ').map(str::to_string).collect::<Vec<_>>();
        assert_eq!(
            cp.exec("ns", &pod, &argv("cat ./p2p/id_rsa.pub")).await.unwrap(),
            "0xabc\n"
        );
        assert!(matches!(
            cp.exec("ns", &pod, &argv("supervisorctl stop core")).await,
            Err(ClientError::Exec(_))
        ));
        assert!(cp.exec("ns", "missing", &argv("ls")).await.unwrap_err().is_not_found());
    }
}
