//! Configuration for the fleet orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet_reconcile::{RetryPolicy, DEFAULT_BATCH_CONCURRENCY, DEFAULT_POLL_INTERVAL};

/// Public location of the bootstrap nodes' published peer addresses.
pub const DEFAULT_BOOTSTRAP_ADDRESSES_URL: &str =
    "https://objectstorage2.blob.core.windows.net/bootstrap-public/bootstrap_addresses.json";

/// Default status cache refresh interval.
pub const DEFAULT_CACHE_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Control-plane API base URL.
    pub kube_api_url: String,

    /// Bearer token passed through to the control plane, if any.
    pub kube_token: Option<String>,

    /// Root of the per-application manifest templates.
    pub template_dir: PathBuf,

    /// Where the bootstrap peer-address list is published.
    pub bootstrap_addresses_url: String,

    /// Status cache refresh interval.
    pub cache_refresh_interval: Duration,

    /// Write worker manifests to disk instead of submitting them.
    pub debug: bool,

    /// Base directory for debug manifests.
    pub debug_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let kube_api_url = std::env::var("FLEET_KUBE_API_URL")
            .unwrap_or_else(|_| "https://127.0.0.1:6443".to_string());

        let kube_token = std::env::var("FLEET_KUBE_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let template_dir = std::env::var("FLEET_TEMPLATE_DIR")
            .unwrap_or_else(|_| "../k8s-configuration/deployments".to_string())
            .into();

        let bootstrap_addresses_url = std::env::var("FLEET_BOOTSTRAP_ADDRESSES_URL")
            .unwrap_or_else(|_| DEFAULT_BOOTSTRAP_ADDRESSES_URL.to_string());

        let cache_refresh_interval = match first_var(&[
            "FLEET_CACHE_REFRESH_INTERVAL",
            "CACHE_REFRESH_INTERVAL",
        ]) {
            Some(ms) => Duration::from_millis(
                ms.parse()
                    .with_context(|| format!("invalid cache refresh interval: {ms}"))?,
            ),
            None => DEFAULT_CACHE_REFRESH_INTERVAL,
        };

        let debug = first_var(&["FLEET_DEBUG", "DEBUG"])
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let debug_dir = std::env::var("FLEET_DEBUG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());

        let log_level = std::env::var("FLEET_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            kube_api_url,
            kube_token,
            template_dir,
            bootstrap_addresses_url,
            cache_refresh_interval,
            debug,
            debug_dir,
            log_level,
        })
    }

    /// Orchestration settings derived from this configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            cache_refresh_interval: self.cache_refresh_interval,
            debug_output: self.debug.then(|| self.debug_dir.clone()),
            ..OrchestratorConfig::default()
        }
    }
}

fn first_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| std::env::var(name).ok())
}

/// Bootstrap discovery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Number of seed instances.
    pub count: u32,

    /// Port the seed nodes listen on.
    pub port: u16,

    /// Poll policy while waiting for public addresses.
    pub address_poll: RetryPolicy,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            count: 3,
            port: 10300,
            address_poll: RetryPolicy::unbounded(DEFAULT_POLL_INTERVAL),
        }
    }
}

/// Orchestration settings held by the [`crate::Orchestrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Status cache refresh interval.
    pub cache_refresh_interval: Duration,

    /// When set, worker manifests are written below this directory instead
    /// of being submitted.
    pub debug_output: Option<PathBuf>,

    pub bootstrap: BootstrapConfig,

    /// Poll policy while waiting for a deleted namespace to disappear.
    pub deletion_poll: RetryPolicy,

    /// Maximum in-flight deletions during environment teardown.
    pub delete_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cache_refresh_interval: DEFAULT_CACHE_REFRESH_INTERVAL,
            debug_output: None,
            bootstrap: BootstrapConfig::default(),
            deletion_poll: RetryPolicy::unbounded(DEFAULT_POLL_INTERVAL),
            delete_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }
}
