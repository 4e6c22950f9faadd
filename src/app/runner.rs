use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;

use crate::app::catalog_store::CatalogStore;
use crate::app::model::RunSummary;
use crate::assemble::{CatalogMetadata, to_record};
use crate::config::{CatalogSpec, load_catalog_spec};
use crate::coordinator::Coordinator;

/// Runs a catalog config end to end: acquire, assemble, persist.
pub struct AcquisitionRunner {
    store: Arc<dyn CatalogStore>,
    coordinator: Coordinator,
}

impl AcquisitionRunner {
    pub fn new(store: Arc<dyn CatalogStore>, coordinator: Coordinator) -> Self {
        Self { store, coordinator }
    }

    /// Background entry point: errors are logged, not returned.
    pub async fn run_config(&self, config_path: PathBuf) {
        match self.acquire_config(&config_path).await {
            Ok(summary) => {
                tracing::info!(
                    catalog_id = %summary.catalog_id,
                    pages = summary.pages_acquired.len(),
                    pages_expected = summary.pages_expected,
                    complete = summary.complete,
                    "scrape finished"
                );
            }
            Err(err) => {
                tracing::error!(config = %config_path.display(), ?err, "scrape failed");
            }
        }
    }

    pub async fn acquire_config(&self, config_path: &Path) -> anyhow::Result<RunSummary> {
        let spec = load_catalog_spec(config_path).context("load catalog config")?;
        self.acquire(&spec).await
    }

    pub async fn acquire(&self, spec: &CatalogSpec) -> anyhow::Result<RunSummary> {
        let report = self
            .coordinator
            .run_report(spec)
            .await
            .with_context(|| format!("acquire catalog {}", spec.id))?;

        let complete = report.is_complete();
        let persisted = if report.catalog.pages.is_empty() {
            tracing::warn!(catalog_id = %spec.id, "no pages acquired; keeping previous record");
            false
        } else {
            let metadata = CatalogMetadata::derive(spec);
            let record = to_record(
                &report.catalog,
                &metadata,
                Some(report.pages_expected),
                Utc::now(),
            );
            self.store
                .upsert(record)
                .await
                .with_context(|| format!("persist catalog {}", spec.id))?;
            true
        };

        Ok(RunSummary {
            catalog_id: report.catalog.id.clone(),
            pages_acquired: report.catalog.page_numbers(),
            pages_expected: report.pages_expected,
            cover: report.catalog.cover_image_path.is_some(),
            complete,
            persisted,
            stop: report.stop,
            diagnostics: report.diagnostics,
        })
    }
}
