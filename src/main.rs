//! ragline CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use ragline::{
    commands::{
        cmd_batch, cmd_document_status, cmd_health_offline, cmd_init, cmd_search,
        cmd_stats_offline, cmd_submit, collect_paths, print_batch_results, print_document_status,
        print_health, print_search_results, print_stats, print_task_result,
    },
    config::Config,
    error::Result,
    meta::MetadataStore,
    pipeline::{AppContext, ProcessingCoordinator, TaskStage},
    store::VectorStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ragline")]
#[command(version, about = "Document ingestion and similarity-search pipeline", long_about = None)]
struct Cli {
    /// Base directory for config and databases (default ~/.ragline)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize ragline configuration and databases
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Submit a single document for processing
    Submit {
        /// Path to the document
        path: String,

        /// Override file type detection (e.g. "txt", "md")
        #[arg(long)]
        file_type: Option<String>,
    },

    /// Submit files or whole directories for processing
    Batch {
        /// Files and/or directories
        inputs: Vec<String>,
    },

    /// Show a document's processing status, or overall stats
    Status {
        /// Source path to inspect
        path: Option<String>,
    },

    /// Search indexed chunks by similarity
    Search {
        /// The search query
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Minimum similarity score (results must score strictly higher)
        #[arg(short, long)]
        threshold: Option<f32>,
    },

    /// Remove a source's embeddings and processing record
    Remove {
        /// Source path to remove
        source: String,
    },

    /// Show aggregate pipeline statistics
    Stats,

    /// Check subsystem health
    Health,

    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("ragline=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragline=info,warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { force } => {
            let config = cmd_init(cli.config, force).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("✓ Initialized ragline at {}", config.paths.base_dir.display());
                println!("  Config: {}", config.paths.config_file.display());
                println!("  Edit the config to choose a provider, then set the API key");
                println!("  environment variable named there.");
            }
            Ok(())
        }

        Commands::Submit { ref path, ref file_type } => {
            let (ctx, coordinator) = start_pipeline(&cli).await?;
            let result = cmd_submit(&coordinator, path, file_type.as_deref()).await;
            coordinator.shutdown().await;
            ctx.shutdown().await;

            let snapshot = result?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_task_result(&snapshot);
            }
            if snapshot.stage != TaskStage::Completed {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Batch { ref inputs } => {
            let (ctx, coordinator) = start_pipeline(&cli).await?;
            let paths = collect_paths(inputs, &ctx.loaders)?;
            let result = cmd_batch(&coordinator, paths).await;
            coordinator.shutdown().await;
            ctx.shutdown().await;

            let results = result?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_batch_results(&results);
            }
            Ok(())
        }

        Commands::Status { ref path } => {
            let config = load_config(&cli)?;
            match path {
                Some(path) => {
                    let metadata_store = MetadataStore::new(&config.paths.meta_db_file).await?;
                    let info = cmd_document_status(&metadata_store, path).await?;
                    metadata_store.close().await;

                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&info)?);
                    } else {
                        print_document_status(path, info.as_ref());
                    }
                }
                None => {
                    let (metadata_store, vector_store) = open_stores(&config).await?;
                    let stats = cmd_stats_offline(&metadata_store, &vector_store).await;
                    metadata_store.close().await;
                    vector_store.close().await;

                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&stats)?);
                    } else {
                        print_stats(&stats);
                    }
                }
            }
            Ok(())
        }

        Commands::Search {
            ref query,
            limit,
            threshold,
        } => {
            let (ctx, coordinator) = start_pipeline(&cli).await?;
            let limit = limit.unwrap_or(ctx.config.search.default_limit);
            let threshold = threshold.unwrap_or(ctx.config.search.similarity_threshold);
            let result = cmd_search(&coordinator, query, limit, threshold).await;
            coordinator.shutdown().await;
            ctx.shutdown().await;

            let results = result?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_search_results(&results);
            }
            Ok(())
        }

        Commands::Remove { ref source } => {
            let (ctx, coordinator) = start_pipeline(&cli).await?;
            let result = coordinator.delete_source(source).await;
            coordinator.shutdown().await;
            ctx.shutdown().await;

            let deleted = result?;
            if cli.json {
                println!("{}", serde_json::json!({ "deleted_embeddings": deleted }));
            } else {
                println!("✓ Removed {} ({} embeddings)", source, deleted);
            }
            Ok(())
        }

        Commands::Stats => {
            let config = load_config(&cli)?;
            let (metadata_store, vector_store) = open_stores(&config).await?;
            let stats = cmd_stats_offline(&metadata_store, &vector_store).await;
            metadata_store.close().await;
            vector_store.close().await;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
            Ok(())
        }

        Commands::Health => {
            let config = load_config(&cli)?;
            let (metadata_store, vector_store) = open_stores(&config).await?;
            let report = cmd_health_offline(&config, &metadata_store, &vector_store).await;
            metadata_store.close().await;
            vector_store.close().await;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_health(&report);
            }
            if !report.healthy {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "ragline", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    Config::load_from(cli.config.clone())
}

async fn open_stores(config: &Config) -> Result<(MetadataStore, VectorStore)> {
    let metadata_store = MetadataStore::new(&config.paths.meta_db_file).await?;
    let vector_store =
        VectorStore::new(&config.paths.vector_db_file, config.embedding.dimension).await?;
    Ok((metadata_store, vector_store))
}

async fn start_pipeline(cli: &Cli) -> Result<(Arc<AppContext>, Arc<ProcessingCoordinator>)> {
    let config = load_config(cli)?;
    let ctx = Arc::new(AppContext::initialize(config).await?);
    let coordinator = ProcessingCoordinator::start(Arc::clone(&ctx));
    Ok((ctx, coordinator))
}
