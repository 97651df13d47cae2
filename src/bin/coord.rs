//! Coordinator binary

use clap::{Parser, Subcommand};
use minigraph::common::{PlacementPolicy, StorageBackend};
use minigraph::Coordinator;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minigraph-coord")]
#[command(about = "minigraph partition routing and write coordinator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Node ID (defaults to the config file value)
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Metadata directory (in-memory metadata if omitted)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Storage nodes known at startup (comma-separated)
        #[arg(long, value_delimiter = ',')]
        nodes: Vec<String>,

        /// Number of graph partitions
        #[arg(long)]
        partitions: Option<u32>,

        /// Placement policy: least_loaded, round_robin or hrw
        #[arg(long)]
        placement: Option<PlacementPolicy>,

        /// Config file stem (without extension)
        #[arg(long, default_value = "minigraph")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            db,
            nodes,
            partitions,
            placement,
            config,
        } => {
            // Load config from file and environment, then override with CLI arguments
            let file_config = minigraph::Config::load_from(&config).unwrap_or_else(|e| {
                eprintln!("Failed to load config, using defaults: {}", e);
                minigraph::Config::default()
            });

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| file_config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let mut coord_config = file_config.coordinator.unwrap_or_default();
            if let Some(bind) = bind {
                coord_config.bind_addr = bind;
            }
            if let Some(path) = db {
                coord_config.storage = StorageBackend::Rocksdb { path };
            }
            if !nodes.is_empty() {
                coord_config.initial_nodes = nodes;
            }
            if let Some(n) = partitions {
                coord_config.num_partitions = n;
            }
            if let Some(policy) = placement {
                coord_config.placement = policy;
            }
            let node_id = id.unwrap_or(file_config.node_id);

            let coord = Coordinator::build(node_id, coord_config)?;
            coord.serve().await?;
        }
    }

    Ok(())
}
