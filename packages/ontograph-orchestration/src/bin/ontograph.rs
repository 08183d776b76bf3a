//! Ontograph CLI
//!
//! # Usage
//!
//! ```bash
//! # Store a text file and run the full pipeline
//! ontograph ingest --workspace 1 --file notes.txt
//!
//! # Re-run the pipeline for a stored document
//! ontograph run --workspace 1 --document 7
//!
//! # Latest execution of a document
//! ontograph status --document 7
//!
//! # Project a workspace into the graph store
//! ontograph sync --workspace 1 --drop
//!
//! # Drop a document's references, sweep orphans and rebuild the graph
//! ontograph remove --document 7 --resync
//!
//! # Similarity search over object nodes
//! ontograph search --workspace 1 --query "vitamin c immunity"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ontograph_core::config::OntographConfig;
use ontograph_core::extraction::provider_from_config;
use ontograph_core::{graph_store_from_config, GraphSynchronizer, ReferenceTracker};
use ontograph_orchestration::{resync_after_removal, ExecutionContext, Runtime};
use ontograph_storage::{ExecutionStore, SqliteStore};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ontograph")]
#[command(about = "Document ontology extraction, deduplication and graph sync", long_about = None)]
struct Cli {
    /// YAML configuration file (defaults plus ONTOGRAPH_DATABASE when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a text file as a document and run the pipeline
    Ingest {
        #[arg(short, long)]
        workspace: i64,

        #[arg(short, long)]
        file: PathBuf,

        /// Document title (file name when omitted)
        #[arg(short, long)]
        title: Option<String>,

        /// Store only, do not run the pipeline
        #[arg(long)]
        no_run: bool,
    },

    /// Run the pipeline for a stored document
    Run {
        #[arg(short, long)]
        workspace: i64,

        #[arg(short, long)]
        document: i64,
    },

    /// Show the latest execution of a document
    Status {
        #[arg(short, long)]
        document: i64,
    },

    /// Synchronize a workspace into the graph store
    Sync {
        #[arg(short, long)]
        workspace: i64,

        /// Drop and recreate collections first
        #[arg(long)]
        drop: bool,
    },

    /// Remove a document's references and sweep orphaned entries
    Remove {
        #[arg(short, long)]
        document: i64,

        /// Only these chunk ids (comma separated)
        #[arg(long, value_delimiter = ',')]
        chunks: Vec<i64>,

        /// Drop and resync the document's workspace graph if entries were swept
        #[arg(long)]
        resync: bool,
    },

    /// Rank object nodes by similarity to a query
    Search {
        #[arg(short, long)]
        workspace: i64,

        #[arg(short, long)]
        query: String,

        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            workspace,
            file,
            title,
            no_run,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let title = title.unwrap_or_else(|| {
                file.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

            let runtime = Runtime::from_config(&config)?;
            let document = runtime.ingest_document(workspace, &title, &content).await?;
            if no_run {
                print_json(&document)?;
                return Ok(());
            }
            let ctx = runtime.orchestrator.execute(workspace, document.id).await?;
            report_run(&ctx)?;
        }
        Commands::Run {
            workspace,
            document,
        } => {
            let runtime = Runtime::from_config(&config)?;
            let ctx = runtime.orchestrator.execute(workspace, document).await?;
            report_run(&ctx)?;
        }
        Commands::Status { document } => {
            let store = SqliteStore::open(&config.database)?;
            match store.latest_execution_for_document(document).await? {
                Some(execution) => print_json(&execution)?,
                None => bail!("no execution recorded for document {document}"),
            }
        }
        Commands::Sync { workspace, drop } => {
            let sync = synchronizer(&config)?;
            let report = sync.sync_workspace(workspace, drop).await?;
            print_json(&report)?;
            if !report.is_complete() {
                bail!("{} graph batches failed", report.failed_batches);
            }
        }
        Commands::Remove {
            document,
            chunks,
            resync,
        } => {
            let store = Arc::new(SqliteStore::open(&config.database)?);
            let tracker = ReferenceTracker::new(store.clone());
            let report = tracker.remove_document_source(document, &chunks).await?;
            print_json(&report)?;

            let swept = report.sweep.as_ref().map_or(0, |sweep| sweep.total());
            if resync {
                let sync = synchronizer(&config)?;
                if let Some(sync_report) =
                    resync_after_removal(store.as_ref(), &sync, document, &report).await?
                {
                    print_json(&sync_report)?;
                }
            } else if swept > 0 {
                warn!(
                    swept,
                    "Swept entries stay in the graph until `ontograph sync --drop` or `remove --resync`"
                );
            }
        }
        Commands::Search {
            workspace,
            query,
            limit,
        } => {
            let sync = synchronizer(&config)?;
            let hits = sync.search_nodes(workspace, &query, limit).await?;
            print_json(&hits)?;
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<OntographConfig> {
    let config = match path {
        Some(path) => OntographConfig::from_yaml(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let mut config = OntographConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            config
        }
    };
    info!(database = %config.database, "Configuration loaded");
    Ok(config)
}

/// Synchronizer without the extraction backend
fn synchronizer(config: &OntographConfig) -> anyhow::Result<GraphSynchronizer> {
    let store = Arc::new(SqliteStore::open(&config.database)?);
    let embedder = provider_from_config(&config.embedding)?;
    let graph = graph_store_from_config(&config.graph)?;
    Ok(GraphSynchronizer::from_config(store, graph, embedder, &config.graph))
}

fn report_run(ctx: &ExecutionContext) -> anyhow::Result<()> {
    print_json(&ctx.execution)?;
    if let Some(failure) = &ctx.failure {
        bail!("{failure}");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
