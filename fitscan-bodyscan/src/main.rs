//! fitscan-bodyscan - Body Scan Reconstruction Service
//!
//! Turns one or two user photos plus declared biometrics into a committed
//! body-scan record: estimate → semantic → match → refine → commit.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fitscan_bodyscan::db::SqliteScanStore;
use fitscan_bodyscan::events::{BroadcastSink, FanoutSink, TracingSink};
use fitscan_bodyscan::fusion::SemanticIndexTable;
use fitscan_bodyscan::stages::{CommitBackend, FunctionClient};
use fitscan_bodyscan::workflow::{PipelineConfig, RetryPolicy, ScanPipeline, ScanStages};
use fitscan_bodyscan::AppState;
use fitscan_common::config::{CommitTarget, RootFolderResolver};

#[derive(Debug, Parser)]
#[command(name = "fitscan-bodyscan", version, about = "Body scan reconstruction service")]
struct Args {
    /// Path to TOML config file
    #[arg(long, env = "FITSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// HTTP port (overrides TOML)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(fitscan_common::config::default_config_path);
    let toml_config = fitscan_common::config::load_or_default(&config_path)?;

    // RUST_LOG overrides the TOML level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let port = args.port.unwrap_or(toml_config.port);
    info!("Starting fitscan-bodyscan (Body Scan Reconstruction)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder and open database
    let root_folder =
        RootFolderResolver::new(args.root_folder.as_deref(), Some(&toml_config)).resolve();
    let db_path = fitscan_common::config::ensure_root_folder(&root_folder)
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Database: {}", db_path.display());

    let db_pool = fitscan_bodyscan::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Step 2: Hard bounds and backend credentials
    let hard_bounds = fitscan_bodyscan::db::bounds::load_hard_bounds(&db_pool).await?;
    info!("Loaded {} hard parameter bounds", hard_bounds.len());

    let api_key = fitscan_bodyscan::config::resolve_backend_api_key(&db_pool, &toml_config).await?;
    let client = Arc::new(
        FunctionClient::new(&toml_config.backend, api_key)
            .map_err(|e| anyhow::anyhow!("Failed to create backend client: {}", e))?,
    );

    // Step 3: Stages and commit target
    let local_commit = toml_config.commit.target == CommitTarget::Local;
    let commit: Arc<dyn CommitBackend> = match toml_config.commit.target {
        CommitTarget::Remote => client.clone() as Arc<dyn CommitBackend>,
        CommitTarget::Local => {
            info!("Committing scans to the local store");
            Arc::new(SqliteScanStore::new(db_pool.clone()))
        }
    };
    let stages = ScanStages {
        estimator: client.clone(),
        classifier: client.clone(),
        matcher: client.clone(),
        refiner: client,
        commit,
    };

    let pipeline_config = PipelineConfig {
        match_limit: toml_config.matching.limit,
        retry: RetryPolicy::from_config(&toml_config.commit),
        indices: SemanticIndexTable::from_config(&toml_config.semantic_indices),
        hard_bounds,
    };
    info!(
        "Commit policy: {} attempts, {} ms delay",
        pipeline_config.retry.max_attempts, toml_config.commit.retry_delay_ms
    );

    // Step 4: Event sinks
    let broadcast = BroadcastSink::new(100);
    let sink = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(broadcast.clone()));

    let pipeline = Arc::new(ScanPipeline::new(stages, pipeline_config, Arc::new(sink)));
    let mut state = AppState::new(db_pool, pipeline, broadcast);
    if local_commit {
        state = state.with_local_store();
    }
    let app = fitscan_bodyscan::build_router(state);

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Scan events: http://{}/events", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
