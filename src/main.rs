//! # SOPS Secret Controller
//!
//! A Kubernetes controller that decrypts `SopsSecret` declarations into
//! Secrets and imports the PGP keys declared by `SopsKey` resources.
//!
//! ## Usage
//!
//! ```bash
//! # Run the controller (default)
//! sops-secret-controller
//!
//! # Print both CRDs
//! sops-secret-controller crd | kubectl apply -f -
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sops_secret_controller::config::ControllerConfig;
use sops_secret_controller::crd::all_crds;
use sops_secret_controller::runtime::{initialization, watch_loop};

#[derive(Parser)]
#[command(name = "sops-secret-controller")]
#[command(about = "Kubernetes controller for SOPS-encrypted secrets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller (default)
    Run,
    /// Print the CustomResourceDefinitions as YAML
    Crd,
}

fn print_crds() -> Result<()> {
    let crds = all_crds().context("Failed to build CRD documents")?;
    let documents = crds
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to serialize CRD documents")?;
    print!("{}", documents.join("---\n"));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Crd => print_crds(),
        Commands::Run => {
            let config = ControllerConfig::from_env();
            let init = initialization::initialize(config).await?;
            watch_loop::run_watch_loop(init.client, init.reconciler, init.server_state).await;
            Ok(())
        }
    }
}
