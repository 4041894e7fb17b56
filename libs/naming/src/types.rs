//! Application kinds managed by the orchestrator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::names::{deployment_name, service_name};
use crate::NamingError;

/// An application deployed into a fleet namespace.
///
/// The canonical string form is upper-case (`WORKER`); resource names use the
/// lower-case form (`worker-1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppKind {
    Worker,
    Bootstrap,
    Km,
    Core,
    P2p,
    Proxy,
    Contract,
}

impl AppKind {
    /// All kinds, in declaration order.
    pub const ALL: [AppKind; 7] = [
        AppKind::Worker,
        AppKind::Bootstrap,
        AppKind::Km,
        AppKind::Core,
        AppKind::P2p,
        AppKind::Proxy,
        AppKind::Contract,
    ];

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AppKind::Worker => "WORKER",
            AppKind::Bootstrap => "BOOTSTRAP",
            AppKind::Km => "KM",
            AppKind::Core => "CORE",
            AppKind::P2p => "P2P",
            AppKind::Proxy => "PROXY",
            AppKind::Contract => "CONTRACT",
        }
    }

    /// Returns the lower-case prefix shared by this kind's resource names.
    #[must_use]
    pub fn prefix(&self) -> String {
        self.as_str().to_lowercase()
    }

    /// Deployment name for this kind.
    #[must_use]
    pub fn deployment_name(&self, index: Option<u32>) -> String {
        deployment_name(self.as_str(), index)
    }

    /// Service name for this kind.
    #[must_use]
    pub fn service_name(&self, index: Option<u32>) -> String {
        service_name(self.as_str(), index)
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppKind {
    type Err = NamingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(NamingError::Empty);
        }
        AppKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| NamingError::UnknownKind(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_case_insensitive() {
        assert_eq!("worker".parse::<AppKind>().unwrap(), AppKind::Worker);
        assert_eq!(" Km ".parse::<AppKind>().unwrap(), AppKind::Km);
        assert_eq!("P2P".parse::<AppKind>().unwrap(), AppKind::P2p);
    }

    #[test]
    fn test_kind_parse_errors() {
        assert_eq!("".parse::<AppKind>().unwrap_err(), NamingError::Empty);
        assert!(matches!(
            "scheduler".parse::<AppKind>().unwrap_err(),
            NamingError::UnknownKind(_)
        ));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(AppKind::Bootstrap.deployment_name(Some(2)), "bootstrap-2");
        assert_eq!(AppKind::Km.service_name(None), "km-service");
        assert_eq!(AppKind::Contract.prefix(), "contract");
    }

    #[test]
    fn test_kind_json_roundtrip() {
        let json = serde_json::to_string(&AppKind::Worker).unwrap();
        assert_eq!(json, "\"WORKER\"");
        let parsed: AppKind = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, AppKind::Worker);
    }

    #[test]
    fn test_all_prefixes_unique() {
        let prefixes: std::collections::HashSet<_> =
            AppKind::ALL.iter().map(AppKind::prefix).collect();
        assert_eq!(prefixes.len(), AppKind::ALL.len());
    }
}
