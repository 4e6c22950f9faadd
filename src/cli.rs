use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};

use crate::config::AcquisitionSettings;
use crate::coordinator::Coordinator;
use crate::fetch::AssetFetcher;
use crate::locate::{DEFAULT_ASSET_HOSTS, DEFAULT_SELECTORS};
use crate::render::{RendererKind, WaitPolicy, build_renderer};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Acquire one catalog and record it in the data dir.
    Acquire(AcquireArgs),
    /// List catalog config files.
    Stores(StoresArgs),
    /// Print the recorded catalogs.
    List(ListArgs),
}

#[derive(Debug, Args)]
pub struct AcquireArgs {
    /// Catalog config file (JSON).
    #[arg(long)]
    pub config: PathBuf,

    /// Output directory for images and `newsletters.json`.
    #[arg(long, env = "FLYERSCRAPE_DATA_DIR", default_value = "newsletters")]
    pub data_dir: PathBuf,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Debug, Args)]
pub struct StoresArgs {
    /// Directory holding `<store>.json` configs.
    #[arg(long, env = "FLYERSCRAPE_CONFIGS_DIR", default_value = "configs")]
    pub configs: PathBuf,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long, env = "FLYERSCRAPE_DATA_DIR", default_value = "newsletters")]
    pub data_dir: PathBuf,
}

/// Acquisition tunables shared by the CLI and the server.
#[derive(Debug, Clone, Args)]
pub struct SettingsArgs {
    /// Page renderer backend.
    #[arg(long, value_enum, env = "FLYERSCRAPE_RENDERER", default_value = "http")]
    pub renderer: RendererKind,

    /// Rendering service base URL (required for `--renderer service`).
    #[arg(long, env = "FLYERSCRAPE_RENDER_ENDPOINT")]
    pub render_endpoint: Option<String>,

    #[arg(long, env = "FLYERSCRAPE_RENDER_TOKEN", hide_env_values = true)]
    pub render_token: Option<String>,

    /// Maximum concurrent image downloads.
    #[arg(long, env = "FLYERSCRAPE_CONCURRENCY", default_value_t = 5)]
    pub concurrency: usize,

    /// Time client-side code gets to settle after navigation.
    #[arg(long, env = "FLYERSCRAPE_SETTLE_MS", default_value_t = 3000)]
    pub settle_ms: u64,

    #[arg(long, env = "FLYERSCRAPE_RENDER_TIMEOUT_MS", default_value_t = 30_000)]
    pub render_timeout_ms: u64,

    /// CSS selector the rendering service waits for.
    #[arg(long, env = "FLYERSCRAPE_WAIT_FOR_SELECTOR")]
    pub wait_for_selector: Option<String>,

    /// Delay between consecutive page renders (politeness).
    #[arg(long, env = "FLYERSCRAPE_PAGE_DELAY_MS", default_value_t = 500)]
    pub page_delay_ms: u64,

    /// Wall-clock budget of one acquisition.
    #[arg(long, env = "FLYERSCRAPE_DEADLINE_SECS", default_value_t = 300)]
    pub deadline_secs: u64,

    /// Consecutive identical or empty resolutions that end iteration (0 disables).
    #[arg(long, env = "FLYERSCRAPE_EARLY_STOP_AFTER", default_value_t = 3)]
    pub early_stop_after: usize,

    #[arg(long, env = "FLYERSCRAPE_MAX_PAGES")]
    pub max_pages: Option<usize>,

    /// Both sides of a page image must exceed this many pixels.
    #[arg(long, env = "FLYERSCRAPE_MIN_IMAGE_DIMENSION", default_value_t = 500)]
    pub min_image_dimension: u32,

    /// Fallback CSS selector; repeat to replace the built-in list.
    #[arg(long = "selector")]
    pub selectors: Vec<String>,

    /// Asset host for single-view catalogs; repeat to replace the built-in list.
    #[arg(long = "asset-host", env = "FLYERSCRAPE_ASSET_HOSTS", value_delimiter = ',')]
    pub asset_hosts: Vec<String>,

    /// Path marker preceding the page number in catalog URLs.
    #[arg(long, env = "FLYERSCRAPE_PAGE_MARKER", default_value = "/page/")]
    pub page_marker: String,
}

impl SettingsArgs {
    pub fn to_settings(&self) -> AcquisitionSettings {
        let or_default = |values: &[String], defaults: &[&str]| {
            if values.is_empty() {
                defaults.iter().map(|s| (*s).to_owned()).collect()
            } else {
                values.to_vec()
            }
        };
        AcquisitionSettings {
            download_concurrency: self.concurrency.max(1),
            wait: WaitPolicy {
                settle: Duration::from_millis(self.settle_ms),
                timeout: Duration::from_millis(self.render_timeout_ms),
                wait_for_selector: self
                    .wait_for_selector
                    .clone()
                    .filter(|s| !s.trim().is_empty()),
            },
            page_delay: Duration::from_millis(self.page_delay_ms),
            deadline: Duration::from_secs(self.deadline_secs),
            early_stop_after: self.early_stop_after,
            max_pages: self.max_pages,
            min_image_dimension: self.min_image_dimension,
            selectors: or_default(&self.selectors, DEFAULT_SELECTORS),
            asset_hosts: or_default(&self.asset_hosts, DEFAULT_ASSET_HOSTS),
            page_marker: self.page_marker.clone(),
        }
    }

    pub fn build_coordinator(&self, data_dir: &Path) -> anyhow::Result<Coordinator> {
        let renderer = build_renderer(
            self.renderer,
            self.render_endpoint.as_deref(),
            self.render_token.as_deref(),
        )
        .context("build renderer")?;
        let fetcher = AssetFetcher::new().context("build asset fetcher")?;
        Coordinator::new(renderer, fetcher, self.to_settings(), data_dir)
    }
}
