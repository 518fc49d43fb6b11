//! dbcollect - collect SQL metrics from database fleets.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dbcollect::config::AppConfig;
use dbcollect::connector::DriverConnectionFactory;
use dbcollect::fingerprint::Fingerprinter;
use dbcollect::registry::FailureRegistry;
use dbcollect::sink::{JsonFileSink, ResultSink, SqliteResultStore};
use dbcollect::CollectionEngine;

#[derive(Parser, Debug)]
#[command(name = "dbcollect", version, about = "Collect SQL metrics from database fleets")]
struct Cli {
    /// Directory (or file) with `<type>-config.yml` system definitions
    #[arg(short, long, default_value = "configs")]
    config: PathBuf,

    /// Directory (or file) with `<type>-metrics.yml` metric definitions
    #[arg(short, long, default_value = "metrics")]
    metrics: PathBuf,

    /// Write all results to this JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Store results in this SQLite database
    #[arg(long, env = "DBCOLLECT_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Concurrent workers
    #[arg(short = 'p', long)]
    threads: Option<usize>,

    /// Per-task timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Directory for the connection blacklist and error log
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Forget all recorded connection failures before running
    #[arg(long)]
    clean: bool,

    /// Only test connectivity to every configured node, ignoring recorded failures
    #[arg(long)]
    test: bool,

    /// Load, validate and plan without connecting
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, cfg: &mut AppConfig) {
        if let Some(threads) = self.threads.filter(|t| *t > 0) {
            cfg.threads = threads;
        }
        if let Some(secs) = self.timeout.filter(|s| *s > 0) {
            cfg.task_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = &self.log_dir {
            cfg.log_dir = dir.clone();
        }
        if let Some(path) = &self.db_path {
            cfg.db_path = Some(path.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let directive = if cli.verbose { "dbcollect=debug" } else { "dbcollect=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(directive.parse()?),
        )
        .init();

    let mut cfg = AppConfig::load();
    cli.apply(&mut cfg);
    tracing::info!("Starting dbcollect with {} workers", cfg.threads);

    let registry = Arc::new(FailureRegistry::with_paths(
        cfg.blacklist_path(),
        Some(cfg.error_log_path()),
        Fingerprinter::from_env(),
    ));
    let factory = Arc::new(DriverConnectionFactory::new(cfg.connect_timeout));
    let engine = CollectionEngine::new(cfg.clone(), factory, registry);

    if cli.clean && !cli.test {
        engine.clear_failures()?;
    }

    if cli.test {
        let report = engine.test_connections(&cli.config).await?;
        for o in &report.outcomes {
            if let Some(latency) = o.latency {
                tracing::info!(
                    "  {} ({}) port {} reachable in {:?}",
                    o.system_name,
                    o.db_type,
                    o.port,
                    latency
                );
            }
        }
        return Ok(());
    }

    if cli.dry_run {
        let (systems, metrics) = engine.load(&cli.config, &cli.metrics)?;
        let tasks = engine.plan(&systems, &metrics);
        tracing::info!(
            "{} systems, {} metrics, {} tasks",
            systems.len(),
            metrics.len(),
            tasks.len()
        );
        for task in &tasks {
            tracing::info!("  {}", task);
        }
        return Ok(());
    }

    let results = engine.run(&cli.config, &cli.metrics).await?;

    let mut sinks: Vec<Box<dyn ResultSink>> = Vec::new();
    if let Some(path) = &cfg.db_path {
        let store = SqliteResultStore::open(path, cfg.sink_batch_size)?;
        tracing::info!("Storing results in {} as run {}", path.display(), store.run_id());
        sinks.push(Box::new(store));
    }
    if let Some(path) = &cli.output {
        sinks.push(Box::new(JsonFileSink::new(path)));
    }

    let failures = engine.deliver(&results, &mut sinks);
    if !failures.is_empty() {
        tracing::warn!(
            "{} of {} result sinks failed; {} results were collected",
            failures.len(),
            sinks.len(),
            results.len()
        );
    }

    Ok(())
}
