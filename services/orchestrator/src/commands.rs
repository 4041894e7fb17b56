//! Command-line interface.

use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use fleet_naming::AppKind;
use fleet_orchestrator::{Orchestrator, SgxMode};
use serde::Serialize;

/// Operate a worker fleet on a cluster control plane.
#[derive(Debug, Parser)]
#[command(name = "fleet-orchestrator")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Namespace holding the environment.
    #[arg(short, long, global = true, env = "FLEET_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// SGX mode applied to every manifest this command creates (SW or HW).
    #[arg(long, global = true, env = "FLEET_SGX_MODE")]
    pub sgx_mode: Option<SgxMode>,

    /// Use an in-memory control plane instead of the API server.
    #[arg(long, global = true)]
    pub mock: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the status of every deployment.
    Status {
        /// Serve from the status cache when one is populated.
        #[arg(long)]
        cached: bool,
    },

    /// Scale the worker pool to a target count.
    Scale {
        /// Desired number of workers.
        #[arg(allow_negative_numbers = true)]
        count: i64,

        /// Also delete the services of removed workers.
        #[arg(long)]
        delete_services: bool,
    },

    /// Restart a worker by deleting its pod.
    RestartWorker(WorkerTarget),

    /// Delete a worker deployment.
    DeleteWorker {
        #[command(flatten)]
        target: WorkerTarget,

        /// Also delete the worker's service.
        #[arg(long)]
        delete_service: bool,
    },

    /// Stop the supervised processes of an application pod.
    StopWorker(ProcessTarget),

    /// Start the supervised processes of an application pod.
    StartWorker(ProcessTarget),

    /// Print an application's in-pod config file.
    ConfigFile {
        #[command(flatten)]
        target: ProcessTarget,

        /// Sub-directory holding the config directory.
        #[arg(long)]
        sub_path: Option<String>,
    },

    /// Create the environment (contract, key management, bootstraps).
    CreateEnv {
        /// Seconds to wait after the contract before key management.
        #[arg(long, default_value_t = 0)]
        contract_grace_secs: u64,
    },

    /// Delete the environment.
    DeleteEnv {
        /// Also delete every service and the namespace.
        #[arg(long)]
        delete_services: bool,
    },

    /// Delete the environment, wait for it to disappear, create it again.
    RecreateEnv,

    /// Restart key management by deleting its pod.
    RestartKm,

    /// Deploy key management.
    TurnOnKm,

    /// Delete the key management deployment.
    TurnOffKm(ServiceFlag),

    /// Delete the contract deployment.
    TurnOffContract(ServiceFlag),
}

#[derive(Debug, Args)]
pub struct WorkerTarget {
    /// Worker index; a random worker when omitted.
    #[arg(long)]
    pub index: Option<u32>,
}

#[derive(Debug, Args)]
pub struct ProcessTarget {
    /// Application kind (WORKER, KM, CONTRACT, ...).
    #[arg(long)]
    pub kind: Option<AppKind>,

    /// Instance index; a random worker when omitted.
    #[arg(long)]
    pub index: Option<u32>,
}

#[derive(Debug, Args)]
pub struct ServiceFlag {
    /// Also delete the service.
    #[arg(long)]
    pub delete_service: bool,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl Cli {
    /// Run the selected command.
    pub async fn run(self, orchestrator: &Orchestrator) -> Result<()> {
        let ns = self.namespace.as_str();

        if let Some(mode) = self.sgx_mode {
            orchestrator.set_sgx_mode(ns, mode).await;
        }

        match self.command {
            Commands::Status { cached } => {
                print_json(&orchestrator.get_status(ns, cached).await?)?;
            }
            Commands::Scale {
                count,
                delete_services,
            } => {
                let outcome = orchestrator.scale_workers(ns, count, delete_services).await?;
                println!(
                    "created {:?}, deleted {:?}",
                    outcome.created, outcome.deleted
                );
            }
            Commands::RestartWorker(target) => {
                let index = orchestrator.restart_worker(ns, target.index).await?;
                println!("restarted worker-{index}");
            }
            Commands::DeleteWorker {
                target,
                delete_service,
            } => {
                let index = orchestrator
                    .delete_worker(ns, target.index, delete_service)
                    .await?;
                println!("deleted worker-{index}");
            }
            Commands::StopWorker(target) => {
                orchestrator
                    .stop_worker_process(ns, target.kind, target.index)
                    .await?;
            }
            Commands::StartWorker(target) => {
                orchestrator
                    .start_worker_process(ns, target.kind, target.index)
                    .await?;
            }
            Commands::ConfigFile { target, sub_path } => {
                let config = orchestrator
                    .get_application_internal_config_file(
                        ns,
                        target.kind,
                        target.index,
                        sub_path.as_deref(),
                    )
                    .await?;
                print_json(&config)?;
            }
            Commands::CreateEnv {
                contract_grace_secs,
            } => {
                orchestrator
                    .create_environment(ns, Duration::from_secs(contract_grace_secs))
                    .await?;
            }
            Commands::DeleteEnv { delete_services } => {
                orchestrator.delete_environment(ns, delete_services).await?;
            }
            Commands::RecreateEnv => orchestrator.recreate_environment(ns).await?,
            Commands::RestartKm => orchestrator.restart_key_management(ns).await?,
            Commands::TurnOnKm => orchestrator.turn_on_key_management(ns).await?,
            Commands::TurnOffKm(flag) => {
                orchestrator
                    .turn_off_key_management(ns, flag.delete_service)
                    .await?;
            }
            Commands::TurnOffContract(flag) => {
                orchestrator
                    .turn_off_contract(ns, flag.delete_service)
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scale_with_global_flags() {
        let cli = Cli::try_parse_from([
            "fleet-orchestrator",
            "scale",
            "5",
            "--namespace",
            "prod",
            "--sgx-mode",
            "hw",
        ])
        .unwrap();

        assert_eq!(cli.namespace, "prod");
        assert_eq!(cli.sgx_mode, Some(SgxMode::Hw));
        assert!(matches!(
            cli.command,
            Commands::Scale {
                count: 5,
                delete_services: false
            }
        ));
    }

    #[test]
    fn test_parse_process_target_kind() {
        let cli =
            Cli::try_parse_from(["fleet-orchestrator", "stop-worker", "--kind", "km"]).unwrap();
        match cli.command {
            Commands::StopWorker(target) => {
                assert_eq!(target.kind, Some(AppKind::Km));
                assert_eq!(target.index, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
