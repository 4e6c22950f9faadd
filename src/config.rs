use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AcquireError;
use crate::locate::{DEFAULT_ASSET_HOSTS, DEFAULT_MIN_IMAGE_DIMENSION, DEFAULT_SELECTORS};
use crate::render::WaitPolicy;
use crate::templater::{DEFAULT_PAGE_MARKER, PagePattern};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// One render per page index.
    #[default]
    PerPage,
    /// Every page image is present in the first page's rendered view.
    SingleView,
}

/// Declarative description of one catalog instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSpec {
    pub id: String,
    #[serde(rename = "cover_image", alias = "coverImageURL", alias = "cover_image_url")]
    pub cover_image_url: Url,
    #[serde(rename = "first_page", alias = "firstPageURL", alias = "first_page_url")]
    pub first_page_url: Url,
    #[serde(rename = "last_page", alias = "lastPageURL", alias = "last_page_url")]
    pub last_page_url: Url,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<String>,
    #[serde(default)]
    pub mode: AcquisitionMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asset_hosts: Vec<String>,
}

impl CatalogSpec {
    /// The id names the catalog directory, so it must be a single path segment.
    pub fn validate_id(&self) -> Result<(), AcquireError> {
        let id = self.id.trim();
        let bad = id.is_empty()
            || id != self.id
            || id == "."
            || id == ".."
            || id.contains(['/', '\\'])
            || id.chars().any(char::is_control);
        if bad {
            return Err(AcquireError::InvalidCatalogId(self.id.clone()));
        }
        Ok(())
    }
}

/// Tunables of one acquisition run.
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub download_concurrency: usize,
    pub wait: WaitPolicy,
    pub page_delay: Duration,
    pub deadline: Duration,
    /// Consecutive identical resolutions (same URL or nothing) that end the
    /// page iteration. Zero disables early stop.
    pub early_stop_after: usize,
    pub max_pages: Option<usize>,
    pub min_image_dimension: u32,
    pub selectors: Vec<String>,
    pub asset_hosts: Vec<String>,
    pub page_marker: String,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            download_concurrency: 5,
            wait: WaitPolicy::default(),
            page_delay: Duration::from_millis(500),
            deadline: Duration::from_secs(300),
            early_stop_after: 3,
            max_pages: None,
            min_image_dimension: DEFAULT_MIN_IMAGE_DIMENSION,
            selectors: DEFAULT_SELECTORS.iter().map(|s| (*s).to_owned()).collect(),
            asset_hosts: DEFAULT_ASSET_HOSTS.iter().map(|s| (*s).to_owned()).collect(),
            page_marker: DEFAULT_PAGE_MARKER.to_owned(),
        }
    }
}

impl AcquisitionSettings {
    pub fn page_pattern(&self) -> anyhow::Result<PagePattern> {
        PagePattern::new(&self.page_marker)
    }

    /// Catalog-level asset hosts take precedence over the run-wide list.
    pub fn asset_hosts_for<'a>(&'a self, spec: &'a CatalogSpec) -> &'a [String] {
        if spec.asset_hosts.is_empty() {
            &self.asset_hosts
        } else {
            &spec.asset_hosts
        }
    }
}

pub fn load_catalog_spec(path: &Path) -> anyhow::Result<CatalogSpec> {
    let data = std::fs::read(path).with_context(|| format!("read config: {}", path.display()))?;
    let spec: CatalogSpec = serde_json::from_slice(&data)
        .with_context(|| format!("parse config: {}", path.display()))?;
    Ok(spec)
}

/// Config file names (`*.json`) in `configs_dir`, sorted.
pub fn list_catalog_configs(configs_dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut configs = Vec::new();
    for entry in std::fs::read_dir(configs_dir)
        .with_context(|| format!("read configs dir: {}", configs_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            configs.push(name.to_owned());
        }
    }
    configs.sort();
    Ok(configs)
}

/// Resolves a config name from the API (`lidl`, `lidl.json`) to a path inside
/// `configs_dir`.
pub fn config_path(configs_dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let name = name.trim();
    let stem = name.strip_suffix(".json").unwrap_or(name);
    let valid = !stem.is_empty()
        && stem
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        && !stem.starts_with('.');
    if !valid {
        anyhow::bail!("invalid config name: {name:?}");
    }
    Ok(configs_dir.join(format!("{stem}.json")))
}
