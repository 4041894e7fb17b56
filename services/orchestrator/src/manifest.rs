//! Deployment and service manifests, and the hardware-mode mutator.
//!
//! Only the fields the orchestrator reads or rewrites are typed. Everything
//! else in a template (probes, resources, ports, annotations...) is carried
//! through the flattened `extra` maps untouched, so a manifest survives a
//! load → mutate → submit round trip.
//!
//! Manifests are plain values. Mutation consumes the value and returns the
//! edited one; a loaded template is cloned once per instance it produces.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Label key tying deployments, pods and services together.
pub const APP_LABEL: &str = "app";

/// Node-selector key choosing the machine pool.
pub const AGENT_POOL_KEY: &str = "agentpool";

/// Volume (and mount) exposing the SGX device; HW only.
pub const SGX_DEVICE_VOLUME: &str = "dev-sgx";

/// Environment variable carrying the SGX mode.
pub const SGX_MODE_ENV: &str = "SGX_MODE";

/// Image tag marker of the default (software) build.
const DEFAULT_IMAGE_MARKER: &str = "_sw:";

// =============================================================================
// SGX Mode
// =============================================================================

/// Hardware-trusted-execution mode of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SgxMode {
    /// Software simulation.
    #[default]
    Sw,
    /// Hardware enclave.
    Hw,
}

impl SgxMode {
    /// Returns the canonical upper-case name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SgxMode::Sw => "SW",
            SgxMode::Hw => "HW",
        }
    }

    /// Lenient parse: `HW` in any case (surrounding whitespace ignored)
    /// selects hardware mode, anything else selects software mode.
    pub fn from_str_lossy(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("HW") {
            SgxMode::Hw
        } else {
            SgxMode::Sw
        }
    }

    /// Node pool the workload must be scheduled on.
    pub const fn agent_pool(&self) -> &'static str {
        match self {
            SgxMode::Sw => "regularpool",
            SgxMode::Hw => "sgxpool",
        }
    }

    fn image_marker(&self) -> String {
        format!("_{}:", self.as_str().to_lowercase())
    }
}

impl fmt::Display for SgxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SgxMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_str_lossy(s))
    }
}

// =============================================================================
// Shared Types
// =============================================================================

/// Object metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Optimistic concurrency token; required on replace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single container environment variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            extra: Map::new(),
        }
    }
}

/// Upsert `name=value` into an ordered environment list.
///
/// An existing entry (at any position, including the first) is replaced in
/// place; otherwise the entry is appended.
pub fn upsert_env(env: &mut Vec<EnvVar>, name: &str, value: &str) {
    let entry = EnvVar::new(name, value);
    match env.iter().position(|var| var.name == name) {
        Some(index) => env[index] = entry,
        None => env.push(entry),
    }
}

// =============================================================================
// Deployment
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    #[serde(default = "default_apps_api_version")]
    pub api_version: String,

    #[serde(default = "default_deployment_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: DeploymentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default)]
    pub selector: LabelSelector,

    pub template: PodTemplateSpec,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: PodSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,

    #[serde(default)]
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,

    #[serde(default)]
    pub mount_path: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Deployment {
    /// The primary (first) container. Templates always declare one.
    pub fn primary_container(&self) -> Option<&Container> {
        self.spec.template.spec.containers.first()
    }

    fn primary_container_mut(&mut self) -> Option<&mut Container> {
        self.spec.template.spec.containers.first_mut()
    }

    /// Value of an environment variable on the primary container.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.primary_container()?
            .env
            .iter()
            .find(|var| var.name == name)?
            .value
            .as_deref()
    }

    /// Upsert an environment variable on the primary container.
    #[must_use]
    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        if let Some(container) = self.primary_container_mut() {
            upsert_env(&mut container.env, name, value);
        }
        self
    }

    /// Rename the deployment and point every `app` label at the new name.
    #[must_use]
    pub fn with_app_name(mut self, name: &str) -> Self {
        self.metadata.name = name.to_string();
        self.metadata
            .labels
            .insert(APP_LABEL.to_string(), name.to_string());
        self.spec
            .selector
            .match_labels
            .insert(APP_LABEL.to_string(), name.to_string());
        self.spec
            .template
            .metadata
            .labels
            .insert(APP_LABEL.to_string(), name.to_string());
        self
    }

    /// Apply the hardware-mode edits for `mode`.
    ///
    /// 1. swap the first `_sw:` image marker for the mode's marker
    /// 2. upsert `SGX_MODE`
    /// 3. select the machine pool
    /// 4. in SW mode, drop the `dev-sgx` volume and mount
    #[must_use]
    pub fn with_sgx_mode(mut self, mode: SgxMode) -> Self {
        if let Some(container) = self.primary_container_mut() {
            if container.image.contains(DEFAULT_IMAGE_MARKER) {
                container.image = container
                    .image
                    .replacen(DEFAULT_IMAGE_MARKER, &mode.image_marker(), 1);
            }
        }

        self = self.with_env(SGX_MODE_ENV, mode.as_str());

        let pod = &mut self.spec.template.spec;
        pod.node_selector
            .insert(AGENT_POOL_KEY.to_string(), mode.agent_pool().to_string());

        if mode == SgxMode::Sw {
            pod.volumes.retain(|volume| volume.name != SGX_DEVICE_VOLUME);
            if let Some(container) = pod.containers.first_mut() {
                container
                    .volume_mounts
                    .retain(|mount| mount.name != SGX_DEVICE_VOLUME);
            }
        }

        self
    }
}

fn default_apps_api_version() -> String {
    "apps/v1".to_string()
}

fn default_deployment_kind() -> String {
    "Deployment".to_string()
}

// =============================================================================
// Service
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default = "default_core_api_version")]
    pub api_version: String,

    #[serde(default = "default_service_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ServiceSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ServiceStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    /// Immutable once assigned by the control plane.
    #[serde(rename = "clusterIP", default, skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default)]
    pub load_balancer: LoadBalancerStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<LoadBalancerIngress>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerIngress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Service {
    /// First externally assigned IP, if the load balancer has provisioned one.
    pub fn external_ip(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .load_balancer
            .ingress
            .first()?
            .ip
            .as_deref()
            .filter(|ip| !ip.is_empty())
    }

    /// Rename the service and select pods of the `app` deployment.
    #[must_use]
    pub fn with_app_name(mut self, name: &str, app: &str) -> Self {
        self.metadata.name = name.to_string();
        self.spec
            .selector
            .insert(APP_LABEL.to_string(), app.to_string());
        self
    }

    /// Drop server-assigned fields so the value can be submitted as new.
    #[must_use]
    pub fn without_server_fields(mut self) -> Self {
        self.spec.cluster_ip = None;
        self.metadata.resource_version = None;
        self.status = None;
        self
    }
}

fn default_core_api_version() -> String {
    "v1".to_string()
}

fn default_service_kind() -> String {
    "Service".to_string()
}

// =============================================================================
// Namespace / Pod
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    #[serde(default = "default_core_api_version")]
    pub api_version: String,

    #[serde(default = "default_namespace_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,
}

impl Namespace {
    pub fn named(name: &str) -> Self {
        Self {
            api_version: default_core_api_version(),
            kind: default_namespace_kind(),
            metadata: ObjectMeta {
                name: name.to_string(),
                ..ObjectMeta::default()
            },
        }
    }
}

fn default_namespace_kind() -> String {
    "Namespace".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

impl Pod {
    /// True if the pod was stamped out by the named deployment.
    ///
    /// Pod names are `{deployment}-{replicaset hash}-{suffix}`; matching on
    /// the trailing dash keeps `worker-1` from claiming `worker-10-...`.
    pub fn belongs_to(&self, deployment: &str) -> bool {
        self.metadata
            .name
            .strip_prefix(deployment)
            .is_some_and(|rest| rest.starts_with('-'))
    }
}
