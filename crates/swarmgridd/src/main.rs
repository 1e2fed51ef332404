//! swarmgridd: the SwarmGrid daemon.
//!
//! Runs the autonomic control loop over a docker swarm, or drives the
//! swarm lifecycle one-shot.
//!
//! # Usage
//!
//! ```text
//! swarmgridd --config /etc/swarmgrid/swarmgrid.toml run
//! swarmgridd --config swarmgrid.toml join --username ubuntu --public-ip 203.0.113.9
//! ```

mod daemon;
mod services;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use swarmgrid_core::SwarmgridConfig;
use swarmgrid_state::{Coordinates, HostAddress, NodeRole};
use tracing::info;

use crate::services::Services;

#[derive(Parser)]
#[command(name = "swarmgridd", about = "SwarmGrid daemon")]
struct Cli {
    /// Path to swarmgrid.toml.
    #[arg(long, short, global = true, default_value = "/etc/swarmgrid/swarmgrid.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct HostArgs {
    #[arg(long)]
    username: String,

    #[arg(long)]
    public_ip: String,

    /// Defaults to the public address.
    #[arg(long)]
    private_ip: Option<String>,

    #[arg(long, requires = "longitude", allow_negative_numbers = true)]
    latitude: Option<f64>,

    #[arg(long, requires = "latitude", allow_negative_numbers = true)]
    longitude: Option<f64>,

    #[arg(long)]
    region: Option<String>,
}

impl HostArgs {
    fn host_address(&self) -> HostAddress {
        HostAddress {
            username: self.username.clone(),
            public_ip: self.public_ip.clone(),
            private_ip: self
                .private_ip
                .clone()
                .unwrap_or_else(|| self.public_ip.clone()),
            coordinates: self
                .latitude
                .zip(self.longitude)
                .map(|(lat, lon)| Coordinates::new(lat, lon)),
            region: self.region.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor loops and reconcilers until Ctrl-C.
    Run,

    /// Initialize the swarm on the configured bootstrap host.
    Init,

    /// Join a host to the swarm.
    Join {
        #[command(flatten)]
        host: HostArgs,

        /// manager or worker.
        #[arg(long, default_value = "worker")]
        role: NodeRole,
    },

    /// Make a host leave the swarm.
    Leave {
        #[command(flatten)]
        host: HostArgs,
    },

    /// Make every node leave, the leader last.
    Destroy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,swarmgridd=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = SwarmgridConfig::from_file(&cli.config)?;
    info!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Command::Run => daemon::run(config).await,
        Command::Init => {
            let bootstrap = config
                .bootstrap
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("init needs a [bootstrap] section"))?;
            let services = Services::build(&config)?;
            let node = services.swarm.init(&bootstrap.host_address()).await?;
            info!(node_id = %node.id, address = %node.address, "swarm initialized");
            Ok(())
        }
        Command::Join { host, role } => {
            let services = Services::build(&config)?;
            let node = services.swarm.join(&host.host_address(), role).await?;
            info!(node_id = %node.id, address = %node.address, %role, "host joined");
            Ok(())
        }
        Command::Leave { host } => {
            let services = Services::build(&config)?;
            services.swarm.leave(&host.host_address()).await?;
            info!(address = %host.public_ip, "host left");
            Ok(())
        }
        Command::Destroy => {
            let services = Services::build(&config)?;
            let report = services.swarm.destroy().await?;
            info!(left = report.left.len(), failed = report.failed.len(), "swarm destroyed");
            if !report.is_clean() {
                anyhow::bail!(
                    "{} node(s) failed to leave: {:?}",
                    report.failed.len(),
                    report.failed
                );
            }
            Ok(())
        }
    }
}
