use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use socratic::agents::AgentRegistry;
use socratic::config::{self, Config};
use socratic::db::{AsyncDatabase, AsyncProjectStore, BlockingBridge, Database};
use socratic::knowledge::KnowledgeIndex;
use socratic::lifecycle::ResourceLifecycle;
use socratic::models::{NewProject, ProjectId};
use socratic::Orchestrator;

#[derive(Parser)]
#[command(name = "socratic")]
#[command(about = "Operator tool for the Socratic project store")]
struct Cli {
    /// Config file (default: <config dir>/socratic/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the blocking single-connection store instead of the pool
    #[arg(long, global = true)]
    blocking: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and apply the schema
    Init,
    /// Create a project
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        /// Explicit project id (default: generated)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Run an agent action against a project
    Exec {
        id: String,
        action: String,
        /// JSON payload
        #[arg(long, default_value = "null")]
        payload: String,
    },
    /// Print a project
    Show { id: String },
    /// List projects a user owns, or is a member of
    List {
        user: String,
        #[arg(long)]
        member: bool,
    },
    /// Knowledge storage usage for a project or an owner
    Storage {
        #[arg(long, conflicts_with = "owner", required_unless_present = "owner")]
        id: Option<String>,
        #[arg(long)]
        owner: Option<String>,
    },
    /// List registered agent actions
    Actions,
}

/// Initialize tracing, writing to stderr so stdout carries only JSON output.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "socratic=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Open the configured store and wire the orchestrator. Every native handle
/// is registered with the returned lifecycle.
async fn open(
    config: &Config,
    blocking: bool,
) -> anyhow::Result<(Orchestrator, ResourceLifecycle)> {
    let lifecycle = ResourceLifecycle::new(config.settle_delay());

    let store: Arc<dyn AsyncProjectStore> = if blocking {
        let db = Database::open(&config.database_path)?;
        db.ensure_schema()?;
        lifecycle.register_database(db.clone())?;
        Arc::new(BlockingBridge::new(db))
    } else {
        let db = AsyncDatabase::open(&config.database_path, config.pool.clone()).await?;
        lifecycle.register_pool(db.pool().clone())?;
        Arc::new(db)
    };

    let index_path = config.index_path();
    let index = Arc::new(
        KnowledgeIndex::open(&index_path)
            .with_context(|| format!("Failed to open knowledge index {}", index_path.display()))?,
    );
    lifecycle.register_index(index.clone())?;

    let agents = AgentRegistry::standard(&config.agents, config.providers());
    Ok((Orchestrator::new(store, agents).with_index(index), lifecycle))
}

async fn run(command: Commands, orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let store = orchestrator.store();
    match command {
        Commands::Init => {}
        Commands::Create {
            owner,
            name,
            id,
            description,
        } => {
            let fields = NewProject {
                id: id.map(ProjectId::from),
                name,
                description,
                ..Default::default()
            };
            let id = orchestrator.create_project(&owner, fields).await?;
            println!("{id}");
        }
        Commands::Exec {
            id,
            action,
            payload,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;
            let execution = orchestrator
                .execute(&ProjectId::from(id), &action, payload)
                .await?;
            print_json(&execution)?;
        }
        Commands::Show { id } => {
            print_json(&orchestrator.project(&ProjectId::from(id)).await?)?;
        }
        Commands::List { user, member } => {
            let projects = if member {
                store.list_by_member(&user).await?
            } else {
                store.list_by_owner(&user).await?
            };
            print_json(&projects)?;
        }
        Commands::Storage { id, owner } => match (id, owner) {
            (Some(id), _) => print_json(&store.storage_summary(&ProjectId::from(id)).await?)?,
            (None, Some(owner)) => {
                let total_bytes = store.storage_used_by_owner(&owner).await?;
                let owned = store.count_owned(&owner).await?;
                print_json(&serde_json::json!({
                    "owner": owner,
                    "active_projects": owned,
                    "total_bytes": total_bytes,
                }))?;
            }
            (None, None) => anyhow::bail!("either --id or --owner is required"),
        },
        Commands::Actions => {
            for action in orchestrator.agents().actions() {
                println!("{action}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()
            .with_context(|| format!("Failed to load {:?}", config::config_path().ok()))?,
    };

    let (orchestrator, lifecycle) = open(&config, cli.blocking).await?;
    if matches!(cli.command, Commands::Init) {
        tracing::info!("Database ready at {}", config.database_path.display());
    }

    let result = run(cli.command, &orchestrator).await;
    drop(orchestrator);
    finish(result, lifecycle.close().await)
}

/// The command's own error wins over a teardown failure, which is only
/// reported when the command succeeded.
fn finish(result: anyhow::Result<()>, closed: socratic::Result<()>) -> anyhow::Result<()> {
    if let Err(e) = closed {
        tracing::warn!("Failed to release resources: {}", e);
        if result.is_ok() {
            return Err(anyhow::Error::new(e).context("Failed to release resources"));
        }
    }
    result
}
