//! # fleet-naming
//!
//! Application kinds and canonical resource names for the fleet orchestrator.
//!
//! ## Naming Scheme
//!
//! Every control-plane resource belonging to an application is named from its
//! kind and an optional instance index:
//!
//! - Deployment: `{lower(kind)}` or `{lower(kind)}-{index}`
//! - Service: `{deployment}-service`
//!
//! Examples:
//! - `worker-3` / `worker-3-service`
//! - `km` / `km-service`
//! - `bootstrap-1` / `bootstrap-1-service`
//!
//! Names are derived, never stored: the set of worker indices in use is
//! recomputed from the deployment names the control plane reports.

mod error;
mod names;
mod types;

pub use error::NamingError;
pub use names::{deployment_name, parse_indexed_name, service_name, SERVICE_SUFFIX};
pub use types::AppKind;
