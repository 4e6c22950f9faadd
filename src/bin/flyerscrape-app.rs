use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use flyerscrape::app::api::{ApiState, router};
use flyerscrape::app::catalog_store::{CatalogStore, LocalFsCatalogStore};
use flyerscrape::app::queue::InProcessQueue;
use flyerscrape::app::runner::AcquisitionRunner;
use flyerscrape::cli::SettingsArgs;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, env = "FLYERSCRAPE_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Images and `newsletters.json`; served under `/newsletters`.
    #[arg(long, env = "FLYERSCRAPE_DATA_DIR", default_value = "newsletters")]
    data_dir: PathBuf,

    #[arg(long, env = "FLYERSCRAPE_CONFIGS_DIR", default_value = "configs")]
    configs_dir: PathBuf,

    /// Acquisitions allowed to run at the same time.
    #[arg(long, default_value_t = 1)]
    max_concurrency: usize,

    /// Static web assets directory (serve if exists).
    #[arg(long, default_value = "web/dist")]
    web_dir: PathBuf,

    #[command(flatten)]
    settings: SettingsArgs,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    flyerscrape::logging::init_with_default("info,tower_http=debug")?;

    let args = AppArgs::parse();
    tracing::info!(
        addr = %args.addr,
        data_dir = %args.data_dir.display(),
        configs_dir = %args.configs_dir.display(),
        renderer = ?args.settings.renderer,
        "starting flyerscrape-app"
    );

    tokio::fs::create_dir_all(&args.data_dir)
        .await
        .with_context(|| format!("create data dir: {}", args.data_dir.display()))?;

    let store: Arc<dyn CatalogStore> = Arc::new(LocalFsCatalogStore::new(&args.data_dir));
    let coordinator = args
        .settings
        .build_coordinator(&args.data_dir)
        .context("build coordinator")?;
    let runner = Arc::new(AcquisitionRunner::new(Arc::clone(&store), coordinator));
    let state = ApiState {
        store,
        runner,
        queue: InProcessQueue::new(args.max_concurrency),
        configs_dir: args.configs_dir.clone(),
    };

    let app = router(state, &args.data_dir, Some(&args.web_dir));

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(?err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
