//! Fleet Orchestrator
//!
//! Command-line entry point. Builds an [`Orchestrator`] over the Kubernetes
//! API client (or the in-memory control plane with `--mock`), the template
//! directory and the published bootstrap peer list, then runs one command.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fleet_orchestrator::{
    Config, ControlPlane, FsTemplateStore, HttpPeerSource, KubeClient, MockControlPlane,
    Orchestrator,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        kube_api_url = %config.kube_api_url,
        template_dir = %config.template_dir.display(),
        debug = config.debug,
        mock = cli.mock,
        "Configuration loaded"
    );

    let control_plane: Arc<dyn ControlPlane> = if cli.mock {
        Arc::new(MockControlPlane::new())
    } else {
        Arc::new(KubeClient::new(&config.kube_api_url, config.kube_token.clone())?)
    };
    let templates = Arc::new(FsTemplateStore::new(&config.template_dir));
    let peers = Arc::new(HttpPeerSource::new(config.bootstrap_addresses_url.clone())?);

    let orchestrator = Orchestrator::new(
        control_plane,
        templates,
        peers,
        config.orchestrator_config(),
    );

    if let Err(e) = cli.run(&orchestrator).await {
        error!(error = %e, "Command failed");
        return Err(e);
    }

    Ok(())
}
