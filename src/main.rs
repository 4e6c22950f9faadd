use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;

use flyerscrape::app::catalog_store::{CatalogStore, LocalFsCatalogStore};
use flyerscrape::app::runner::AcquisitionRunner;
use flyerscrape::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    flyerscrape::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Acquire(args) => {
            let coordinator = args
                .settings
                .build_coordinator(&args.data_dir)
                .context("build coordinator")?;
            let store: Arc<dyn CatalogStore> = Arc::new(LocalFsCatalogStore::new(&args.data_dir));
            let runner = AcquisitionRunner::new(store, coordinator);
            let summary = runner.acquire_config(&args.config).await.context("acquire")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("serialize summary")?
            );
        }
        Command::Stores(args) => {
            for name in flyerscrape::config::list_catalog_configs(&args.configs).context("stores")? {
                println!("{name}");
            }
        }
        Command::List(args) => {
            let store = LocalFsCatalogStore::new(&args.data_dir);
            let records = store.list().await.context("list")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&records).context("serialize catalogs")?
            );
        }
    }

    Ok(())
}
