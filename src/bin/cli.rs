//! CLI for coordinator operations

use clap::{Parser, Subcommand};
use minigraph::common::NodeId;
use minigraph::ops::DataLoadTarget;
use minigraph::{ClientConfig, GraphClient};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minigraph")]
#[command(about = "minigraph coordinator CLI")]
#[command(version)]
struct Cli {
    /// Coordinator addresses (host:port, comma-separated)
    #[arg(long, default_value = "localhost:7000")]
    coordinator: String,

    /// Basic auth username
    #[arg(long, env = "MINIGRAPH_USER")]
    user: Option<String>,

    /// Basic auth password
    #[arg(long, env = "MINIGRAPH_PASSWORD")]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schema operations
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Bulk data load
    Load {
        #[command(subcommand)]
        action: LoadAction,
    },

    /// Backup operations
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Report storage nodes joining
    Join {
        #[arg(value_delimiter = ',', required = true)]
        nodes: Vec<String>,
    },

    /// Report storage nodes leaving
    Leave {
        #[arg(value_delimiter = ',', required = true)]
        nodes: Vec<String>,
    },

    /// Wait until a snapshot is applied everywhere
    Flush { snapshot_id: u64 },

    /// Show metrics
    Metrics {
        /// Roles to include (comma-separated, all if omitted)
        #[arg(long, default_value = "")]
        roles: String,
    },

    /// Show the number of partitions
    Partitions,
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Print the current schema
    Get,
    /// Drop every type
    Drop,
    /// Load types from a JSON file
    Load { file: PathBuf },
}

#[derive(Subcommand)]
enum LoadAction {
    /// Prepare targets from a JSON file (array of targets)
    Prepare { file: PathBuf },
    /// Stage a data path
    Ingest { path: String },
    /// Bind tables (JSON file: table id → target) to a staged path
    Commit { tables: PathBuf, path: String },
    /// Discard staged paths
    Clear,
}

#[derive(Subcommand)]
enum BackupAction {
    /// Create a backup
    Create {
        /// Wait for the copy to finish
        #[arg(long)]
        wait: bool,
    },
    /// List backups
    List,
    /// Delete one backup
    Delete { id: u32 },
    /// Keep only the newest complete backups
    Purge {
        #[arg(long, default_value = "1")]
        keep: usize,
    },
    /// Check a backup's integrity
    Verify { id: u32 },
    /// Restore a backup (engine must be stopped)
    Restore {
        id: u32,
        #[arg(long)]
        meta_path: PathBuf,
        #[arg(long)]
        store_path: PathBuf,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = ClientConfig::from_hosts(&cli.coordinator, cli.user, cli.password)?;
    let client = GraphClient::new(config)?;

    match cli.command {
        Commands::Schema { action } => match action {
            SchemaAction::Get => print_json(&client.get_schema().await?)?,
            SchemaAction::Drop => print_json(&client.drop_schema().await?)?,
            SchemaAction::Load { file } => {
                let json = tokio::fs::read_to_string(&file).await?;
                print_json(&client.load_json_schema(&json).await?)?;
            }
        },

        Commands::Load { action } => match action {
            LoadAction::Prepare { file } => {
                let targets: Vec<DataLoadTarget> =
                    serde_json::from_str(&tokio::fs::read_to_string(&file).await?)?;
                print_json(&client.prepare_data_load(targets).await?)?;
            }
            LoadAction::Ingest { path } => {
                client.ingest_data(&path).await?;
                println!("Staged {}", path);
            }
            LoadAction::Commit { tables, path } => {
                let tables: BTreeMap<u64, DataLoadTarget> =
                    serde_json::from_str(&tokio::fs::read_to_string(&tables).await?)?;
                let count = tables.len();
                client.commit_data_load(tables, &path).await?;
                println!("Committed {} tables from {}", count, path);
            }
            LoadAction::Clear => {
                client.clear_ingest().await?;
                println!("Cleared staged data");
            }
        },

        Commands::Backup { action } => match action {
            BackupAction::Create { wait } => {
                let id = client.create_backup().await?;
                println!("Backup {} started", id);
                if wait {
                    let record = client.wait_backup(id).await?;
                    println!("Backup {} {}", id, record.status);
                }
            }
            BackupAction::List => {
                let records = client.list_backups().await?;
                println!("{:>6}  {:<10}  {:>10}  {:>10}  created", "id", "status", "snapshot", "partitions");
                for r in records {
                    println!(
                        "{:>6}  {:<10}  {:>10}  {:>10}  {}",
                        r.id,
                        r.status.to_string(),
                        r.snapshot_id,
                        r.partition_count,
                        r.created_at.to_rfc3339()
                    );
                }
            }
            BackupAction::Delete { id } => {
                client.delete_backup(id).await?;
                println!("Backup {} deleted", id);
            }
            BackupAction::Purge { keep } => {
                let deleted = client.purge_backups(keep).await?;
                println!("Purged {} backups: {:?}", deleted.len(), deleted);
            }
            BackupAction::Verify { id } => {
                let (valid, message) = client.verify_backup(id).await?;
                println!("{} {}", if valid { "✓" } else { "✗" }, message);
                if !valid {
                    std::process::exit(1);
                }
            }
            BackupAction::Restore {
                id,
                meta_path,
                store_path,
            } => {
                client.restore_backup(id, &meta_path, &store_path).await?;
                println!("Backup {} restored", id);
            }
        },

        Commands::Join { nodes } => {
            client
                .nodes_join(nodes.into_iter().map(NodeId::new).collect())
                .await?;
            println!("Join applied");
        }

        Commands::Leave { nodes } => {
            client
                .nodes_leave(nodes.into_iter().map(NodeId::new).collect())
                .await?;
            println!("Leave applied");
        }

        Commands::Flush { snapshot_id } => {
            client.remote_flush(snapshot_id).await?;
            println!("Snapshot {} flushed", snapshot_id);
        }

        Commands::Metrics { roles } => print_json(&client.get_metrics(&roles).await?)?,

        Commands::Partitions => {
            println!("{}", client.get_partition_num().await?);
        }
    }

    Ok(())
}
