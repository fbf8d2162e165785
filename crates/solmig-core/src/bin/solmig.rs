use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use _solmig_core::config::PipelineConfig;
use _solmig_core::indexer::graph::EdgeKind;
use _solmig_core::pipeline::local::LocalRepositoryClient;
use _solmig_core::pipeline::{MigrationPipeline, RepoKey};

#[derive(Parser)]
#[command(name = "solmig")]
#[command(about = "Analyse Solidity repositories and plan migrations", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (SOLMIG_* variables still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log only warnings and errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a checkout and print its metadata and file tree
    Ingest(RepoArgs),
    /// Extract contracts and the dependency graph
    Analyze(RepoArgs),
    /// Print only the dependency graph with unresolved references
    Graph(RepoArgs),
    /// Build a migration plan (no generator is configured, so only risk is assessed)
    Plan(RepoArgs),
    /// Print the effective configuration
    Config,
}

#[derive(clap::Args)]
struct RepoArgs {
    /// Path to the repository checkout
    path: PathBuf,

    /// Repository key (owner/name); defaults to local/<directory>, with
    /// characters a key cannot hold replaced by `-`
    #[arg(long)]
    key: Option<String>,
}

#[derive(Serialize)]
struct GraphOutput<'a> {
    nodes: Vec<&'a str>,
    import_edges: usize,
    inheritance_edges: usize,
    edges: Vec<&'a _solmig_core::indexer::graph::DependencyEdge>,
    unresolved: Vec<&'a str>,
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

fn open(args: &RepoArgs, config: &PipelineConfig) -> Result<(MigrationPipeline, RepoKey)> {
    let root = args
        .path
        .canonicalize()
        .with_context(|| format!("cannot open repository at {}", args.path.display()))?;
    let client = LocalRepositoryClient::new(&root, config.scan_options());
    let key = match &args.key {
        Some(raw) => RepoKey::parse(raw)?,
        None => client.default_key()?,
    };
    let pipeline =
        MigrationPipeline::new(config.clone()).with_repository_client(Arc::new(client));
    Ok((pipeline, key))
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    PipelineConfig::load(path).context("failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Ingest(args) => {
            let (pipeline, key) = open(args, &config)?;
            let ingest = pipeline.ingest(&key).await?;
            emit(&ingest.metadata, cli.pretty)?;
            emit(&ingest.tree, cli.pretty)?;
        }
        Commands::Analyze(args) => {
            let (pipeline, key) = open(args, &config)?;
            let analysis = pipeline.analyze(&key).await?;
            emit(analysis.as_ref(), cli.pretty)?;
        }
        Commands::Graph(args) => {
            let (pipeline, key) = open(args, &config)?;
            let analysis = pipeline.analyze(&key).await?;
            let graph = &analysis.dependency_graph;
            emit(
                &GraphOutput {
                    nodes: graph.nodes().collect(),
                    import_edges: graph.edge_count_of(EdgeKind::Import),
                    inheritance_edges: graph.edge_count_of(EdgeKind::Inheritance),
                    edges: graph.edges().collect(),
                    unresolved: graph.unresolved_references(),
                },
                cli.pretty,
            )?;
        }
        Commands::Plan(args) => {
            let (pipeline, key) = open(args, &config)?;
            let plan = pipeline.plan(&key).await?;
            emit(plan.as_ref(), cli.pretty)?;
        }
        Commands::Config => emit(&config, cli.pretty)?,
    }
    Ok(())
}
