//! hopctl
//!
//! Command-line client for the hop gateway: container stats with anomaly
//! flags and Docker management on VMs behind the bastion.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{containers, images, network};

/// CLI for the hop gateway
#[derive(Parser)]
#[command(name = "hopctl")]
#[command(author, version, about = "CLI for the hop gateway", long_about = None)]
pub struct Cli {
    /// Gateway URL [default: http://localhost:3000]
    #[arg(long, env = "HOPCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format [default: table]
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the VMs the gateway can reach
    Vms,

    /// Show container stats with anomaly flags
    Stats {
        /// VM name
        vm: String,
    },

    /// List images
    Images {
        /// VM name
        vm: String,
    },

    /// Remove an image
    Rmi {
        /// VM name
        vm: String,
        /// Image ID or reference
        image: String,
    },

    /// List volumes
    Volumes {
        /// VM name
        vm: String,
    },

    /// Remove a volume
    Rmvol {
        /// VM name
        vm: String,
        /// Volume name
        name: String,
    },

    /// Show the last 200 log lines of a container
    Logs {
        /// VM name
        vm: String,
        /// Container name or ID
        container: String,
    },

    /// Stop a container
    Stop {
        /// VM name
        vm: String,
        /// Container name or ID
        container: String,
    },

    /// Restart a container
    Restart {
        /// VM name
        vm: String,
        /// Container name or ID
        container: String,
    },

    /// Run a command inside a container
    Exec {
        /// VM name
        vm: String,
        /// Container name or ID
        container: String,
        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// List a container's environment, or export a variable
    Env {
        /// VM name
        vm: String,
        /// Container name or ID
        container: String,
        /// Export KEY=VALUE in a one-off shell inside the container
        #[arg(long, value_name = "KEY=VALUE", value_parser = containers::parse_assignment)]
        set: Option<(String, String)>,
    },

    /// Inspect the bridge network
    Network {
        /// VM name
        vm: String,
    },

    /// Show `docker inspect` output for a container
    Inspect {
        /// VM name
        vm: String,
        /// Container name or ID
        container: String,
    },

    /// Start a detached container
    Deploy {
        /// VM name
        vm: String,
        /// Image reference
        image: String,
        /// Container name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let client = client::ApiClient::new(&config.api_url(cli.api_url))?;
    let format = config.format(cli.format);

    match cli.command {
        Commands::Vms => network::list_vms(&client, format).await?,
        Commands::Stats { vm } => containers::show_stats(&client, &vm, format).await?,
        Commands::Images { vm } => images::list_images(&client, &vm, format).await?,
        Commands::Rmi { vm, image } => images::remove_image(&client, &vm, &image, format).await?,
        Commands::Volumes { vm } => images::list_volumes(&client, &vm, format).await?,
        Commands::Rmvol { vm, name } => images::remove_volume(&client, &vm, &name, format).await?,
        Commands::Logs { vm, container } => {
            containers::show_logs(&client, &vm, &container, format).await?
        }
        Commands::Stop { vm, container } => {
            containers::stop(&client, &vm, &container, format).await?
        }
        Commands::Restart { vm, container } => {
            containers::restart(&client, &vm, &container, format).await?
        }
        Commands::Exec {
            vm,
            container,
            command,
        } => containers::exec(&client, &vm, &container, &command, format).await?,
        Commands::Env { vm, container, set } => {
            containers::env(&client, &vm, &container, set, format).await?
        }
        Commands::Network { vm } => network::show_network(&client, &vm, format).await?,
        Commands::Inspect { vm, container } => {
            containers::inspect(&client, &vm, &container).await?
        }
        Commands::Deploy { vm, image, name } => {
            containers::deploy(&client, &vm, &image, &name, format).await?
        }
    }

    Ok(())
}
