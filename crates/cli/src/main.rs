#![deny(warnings)]

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vox_core::aggregator::FeatureAggregator;
use vox_core::config::{
    parse_bind_addr, resolve_optional_string, resolve_parsed, resolve_string_with_default,
    AnalysisConfig, AppConfig, Env, FrameFormat, OverloadPolicy, StdEnv, StoreConfig,
    WorkerPoolConfig, DEFAULT_BIND_ADDR, DEFAULT_BROADCAST_CAPACITY, DEFAULT_DB_MAX_CONNECTIONS,
    DEFAULT_FRAME_SIZE, DEFAULT_HISTORY_LIMIT, DEFAULT_QUEUE_CAPACITY, DEFAULT_SAMPLE_RATE_HZ,
    DEFAULT_WORKERS, ENV_BIND_ADDR, ENV_DATABASE_PATH, ENV_DB_MAX_CONNECTIONS,
    ENV_OVERLOAD_POLICY, ENV_QUEUE_CAPACITY, ENV_WORKERS,
};
use vox_core::features::FeatureExtractor;
use vox_core::hub::SessionHub;
use vox_core::pipeline::{AnalysisPool, Pipeline};
use vox_core::store::open_store;
use vox_core::transport::{serve, AppState};

#[derive(Parser, Debug)]
#[command(name = "vox")]
#[command(about = "Real-time vocal metrics over WebSocket (pitch, formants, harmonics, voice quality)")]
struct Args {
    /// Address to listen on [env: VOX_BIND_ADDR] [default: 0.0.0.0:3000]
    #[arg(long)]
    bind: Option<String>,

    /// SQLite database file; metrics stay in memory when unset [env: VOX_DATABASE_PATH]
    #[arg(long)]
    database_path: Option<String>,

    /// Analysis worker threads [env: VOX_WORKERS]
    #[arg(long)]
    workers: Option<usize>,

    /// Frames that may wait for a worker [env: VOX_QUEUE_CAPACITY]
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// drop-oldest or reject-new [env: VOX_OVERLOAD_POLICY]
    #[arg(long)]
    overload_policy: Option<OverloadPolicy>,

    /// Concurrent database connections [env: VOX_DB_MAX_CONNECTIONS]
    #[arg(long)]
    db_max_connections: Option<usize>,

    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE_HZ)]
    sample_rate: u32,

    #[arg(long, default_value_t = DEFAULT_FRAME_SIZE)]
    frame_size: usize,

    #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
    history_limit: usize,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(args, &env)?;

    tracing::info!(
        bind = %cfg.bind_addr,
        sample_rate_hz = cfg.analysis.format.sample_rate_hz,
        frame_size = cfg.analysis.format.frame_size,
        workers = cfg.pool.workers,
        policy = %cfg.pool.policy,
        persistent = cfg.store.database_path.is_some(),
        "config loaded"
    );

    run_server(cfg).await
}

async fn run_server(cfg: AppConfig) -> anyhow::Result<()> {
    let store = open_store(&cfg.store)
        .await
        .context("failed to open metrics store")?;
    let pool = AnalysisPool::with_feature_extractor(&cfg.pool, FeatureExtractor::new(&cfg.analysis))
        .context("failed to start analysis pool")?;
    let pool = Arc::new(pool);
    let hub = Arc::new(SessionHub::new(cfg.broadcast_capacity));
    let aggregator = FeatureAggregator::new(store, hub);
    let pipeline = Pipeline::new(pool.clone(), aggregator);
    let state = AppState::new(pipeline, cfg.analysis.format, cfg.history_limit);

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind_addr))?;
    serve(listener, state, shutdown_signal())
        .await
        .context("server failed")?;

    stop_pool(pool).await
}

/// Joins the worker threads without parking a runtime thread.
async fn stop_pool(pool: Arc<AnalysisPool>) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || pool.shutdown())
        .await
        .context("analysis pool shutdown panicked")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn build_config(args: Args, env: &impl Env) -> anyhow::Result<AppConfig> {
    let bind_addr = parse_bind_addr(&resolve_string_with_default(
        args.bind,
        ENV_BIND_ADDR,
        env,
        DEFAULT_BIND_ADDR,
    ))?;

    let format = FrameFormat::new(args.sample_rate, args.frame_size)?;
    let analysis = AnalysisConfig {
        format,
        ..AnalysisConfig::default()
    };

    let pool = WorkerPoolConfig::new(
        resolve_parsed(args.workers, ENV_WORKERS, env, DEFAULT_WORKERS)?,
        resolve_parsed(args.queue_capacity, ENV_QUEUE_CAPACITY, env, DEFAULT_QUEUE_CAPACITY)?,
        resolve_parsed(args.overload_policy, ENV_OVERLOAD_POLICY, env, OverloadPolicy::default())?,
    )?;

    let store = StoreConfig::new(
        resolve_optional_string(args.database_path, ENV_DATABASE_PATH, env),
        resolve_parsed(
            args.db_max_connections,
            ENV_DB_MAX_CONNECTIONS,
            env,
            DEFAULT_DB_MAX_CONNECTIONS,
        )?,
    )?;

    Ok(AppConfig {
        bind_addr,
        analysis,
        pool,
        store,
        broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        history_limit: args.history_limit,
    })
}
