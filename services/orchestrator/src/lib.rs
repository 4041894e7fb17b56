//! Fleet Orchestrator Library
//!
//! Operates a fleet of worker processes and their supporting services
//! (bootstrap seeds, key management, contract host) on a cluster control
//! plane. Every operation is a method on [`Orchestrator`], which is built
//! over three collaborators:
//!
//! ```text
//! Orchestrator
//! ├── ControlPlane   (namespace/deployment/service/pod verbs + exec)
//! ├── TemplateStore  (per-application manifest templates)
//! └── PeerSource     (published bootstrap peer identities)
//! ```
//!
//! ## Modules
//!
//! - `allocator`: Worker index allocation
//! - `scaler`: Scale the worker pool to a target count
//! - `bootstrap`: Seed node provisioning and address discovery
//! - `environment`: Create/delete/recreate a namespace-scoped environment
//! - `status`: Fleet status and the per-namespace status cache
//! - `exec`: Commands inside application pods
//! - `apps`: Restart and turn off single applications
//! - `kube`: Kubernetes API client
//! - `mock`: In-memory control plane for tests and dry runs

pub mod allocator;
pub mod apps;
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod environment;
pub mod error;
pub mod exec;
pub mod kube;
pub mod manifest;
pub mod mock;
pub mod orchestrator;
pub mod peers;
pub mod scaler;
pub mod status;
pub mod templates;

// Re-export commonly used types
pub use bootstrap::BootstrapAssignment;
pub use client::{ClientError, ControlPlane};
pub use config::{Config, OrchestratorConfig};
pub use environment::EnvironmentState;
pub use error::{OrchestratorError, OrchestratorResult};
pub use kube::KubeClient;
pub use manifest::SgxMode;
pub use mock::MockControlPlane;
pub use orchestrator::Orchestrator;
pub use peers::{HttpPeerSource, PeerSource, StaticPeerSource};
pub use scaler::ScaleOutcome;
pub use status::{FleetStatus, ResourceStatus};
pub use templates::{FsTemplateStore, StaticTemplateStore, TemplateStore};
