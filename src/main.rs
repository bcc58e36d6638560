// ABOUTME: CLI entry point for watermark-replicator
// ABOUTME: Resolves environment config and catalog, then runs one replication pass

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use watermark_replicator::config::DEFAULT_CONFIG_PATH;
use watermark_replicator::connectors::ConnectorOptions;
use watermark_replicator::watermark::{
    CheckpointStore, EnvCheckpointStore, JsonFileCheckpointStore,
};
use watermark_replicator::{
    ConnectorFactory, ConnectorRegistry, PipelineRunner, ReplicatorConfig, TableCatalog,
};

#[derive(Parser)]
#[command(name = "watermark-replicator")]
#[command(
    about = "Incrementally replicate tables into PostgreSQL using per-table watermarks",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Environment name from the configuration file (e.g. dev, prod)
    env: String,
    /// Tables to process: `all` or a comma-separated list of table names
    tables: String,
    /// Path to the tables_list catalog (overrides the environment's `catalog`)
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Path to the environment configuration file
    #[arg(long, env = "REPLICATOR_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Persist watermarks to this JSON file instead of LAST_/NEW_WATERMARK_* variables
    #[arg(long = "checkpoint-file")]
    checkpoint_file: Option<PathBuf>,
    /// Rows per INSERT statement on the target (overrides the environment's `batch_size`)
    #[arg(long = "batch-size")]
    batch_size: Option<usize>,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
    /// Also append logs to this file
    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(long = "allow-self-signed-certs", default_value_t = false)]
    allow_self_signed_certs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log. The guard flushes the log file on exit.
    let _log_guard = watermark_replicator::logging::init_logging(&cli.log, cli.log_file.as_deref())?;

    tracing::info!(
        "Starting watermark-replicator for environment '{}' with tables '{}'",
        cli.env,
        cli.tables
    );

    let mut config = ReplicatorConfig::load(&cli.config, &cli.env)
        .with_context(|| format!("Failed to resolve environment '{}'", cli.env))?;
    if let Some(batch_size) = cli.batch_size {
        if batch_size == 0 {
            bail!("--batch-size must be greater than zero");
        }
        config.batch_size = batch_size;
    }

    let catalog_path = cli.catalog.clone().unwrap_or_else(|| config.catalog_path.clone());
    let catalog = TableCatalog::from_csv_path(&catalog_path).context("Failed to load table catalog")?;
    let selection = catalog.select(&cli.tables);
    if selection.is_empty() {
        bail!(
            "No tables to process for selector '{}' (check to_be_loaded in {})",
            cli.tables,
            catalog_path.display()
        );
    }

    let checkpoints: Arc<dyn CheckpointStore> = match &cli.checkpoint_file {
        Some(path) => {
            tracing::info!("Using checkpoint file {}", path.display());
            Arc::new(JsonFileCheckpointStore::open(path.clone()).await?)
        }
        None => Arc::new(EnvCheckpointStore::new()),
    };

    let factory = ConnectorFactory::new(ConnectorRegistry::with_defaults())
        .with_options(ConnectorOptions {
            batch_size: config.batch_size,
            accept_invalid_certs: cli.allow_self_signed_certs,
        })
        .with_connect_retries(config.connect_retries);

    let source = factory
        .create_source(&config.source)
        .await
        .context("Failed to create source connector")?;
    let target = match factory.create_target(&config.target).await {
        Ok(target) => target,
        Err(e) => {
            let mut source = source;
            source.close().await;
            return Err(e).context("Failed to create target connector");
        }
    };

    let summary = PipelineRunner::new(source, target, checkpoints)
        .run(&selection.entries)
        .await?;

    if !summary.is_success() {
        tracing::warn!(
            "⚠ {} table(s) failed: {}",
            summary.failed(),
            summary.failed_tables().join(", ")
        );
    }

    Ok(())
}
