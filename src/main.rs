// Command-line entry point for execgraph.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use execgraph::api::dto::{GraphDto, StatsDto};
use execgraph::application::Session;
use execgraph::config::RecorderConfig;
use execgraph::domain::store::SledGraphStore;
use execgraph::infrastructure::concurrency::init_thread_pool;
use execgraph::infrastructure::{ManualClock, Replay, SynSourceParser, TraceLog};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON trace log into a graph store
    Replay {
        /// Trace log file
        #[arg(short, long)]
        log: PathBuf,

        /// Graph store directory (created if missing)
        #[arg(short, long)]
        store: PathBuf,

        /// Recorder configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Worker threads for source parsing (default: half the cores)
        #[arg(short, long)]
        threads: Option<usize>,
    },

    /// Count nodes per label and relationships per type
    Stats {
        #[arg(short, long)]
        store: PathBuf,
    },

    /// Write the whole graph as JSON
    Export {
        #[arg(short, long)]
        store: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn open_store(path: &Path) -> Result<SledGraphStore> {
    let path = path.to_str().context("store path is not valid UTF-8")?;
    SledGraphStore::open(path).with_context(|| format!("cannot open graph store at {}", path))
}

fn replay(log: PathBuf, store: PathBuf, config: Option<PathBuf>, threads: Option<usize>) -> Result<()> {
    init_thread_pool(threads)?;

    let config = match config {
        Some(path) => RecorderConfig::load(&path)?,
        None => RecorderConfig::default(),
    };
    let trace = TraceLog::load(&log)?;
    info!(
        objects = trace.objects.len(),
        events = trace.events.len(),
        log = %log.display(),
        "loaded trace log"
    );
    let replay = Replay::build(trace)?;

    let parser = SynSourceParser;
    let clock = ManualClock::new();
    let store = open_store(&store)?;
    let mut session = Session::new(replay.heap(), &parser, &clock, store, config);
    let summary = session.record_events(replay.timed(&clock))?;
    let store = session.into_store()?;
    store.sync()?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Replay {
            log,
            store,
            config,
            threads,
        } => replay(log, store, config, threads),
        Command::Stats { store } => {
            let store = open_store(&store)?;
            let stats = StatsDto::from_store(&store)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Export { store, output } => {
            let store = open_store(&store)?;
            let graph = GraphDto::from_store(&store)?;
            let json = serde_json::to_string_pretty(&graph)?;
            fs::write(&output, json).with_context(|| format!("cannot write {}", output.display()))?;
            info!(
                nodes = graph.nodes.len(),
                edges = graph.edges.len(),
                output = %output.display(),
                "exported graph"
            );
            Ok(())
        }
    }
}
