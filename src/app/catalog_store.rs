use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use crate::formats::CatalogRecord;

pub const CATALOG_INDEX_FILE: &str = "newsletters.json";

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<CatalogRecord>>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<CatalogRecord>>;
    /// Replaces the whole collection.
    async fn save_all(&self, records: &[CatalogRecord]) -> anyhow::Result<()>;
    /// Replaces the record with the same id, or adds it.
    async fn upsert(&self, record: CatalogRecord) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsCatalogStore {
    base_dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl LocalFsCatalogStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join(CATALOG_INDEX_FILE)
    }

    async fn read_all(&self) -> anyhow::Result<Vec<CatalogRecord>> {
        let path = self.index_path();
        let records: Option<Vec<CatalogRecord>> = read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?;
        Ok(records.unwrap_or_default())
    }
}

#[async_trait]
impl CatalogStore for LocalFsCatalogStore {
    async fn list(&self) -> anyhow::Result<Vec<CatalogRecord>> {
        self.read_all().await
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<CatalogRecord>> {
        Ok(self.read_all().await?.into_iter().find(|r| r.id == id))
    }

    async fn save_all(&self, records: &[CatalogRecord]) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        write_json_atomic(&self.index_path(), &records)
            .await
            .with_context(|| format!("write {CATALOG_INDEX_FILE}"))
    }

    async fn upsert(&self, record: CatalogRecord) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        records.retain(|r| r.id != record.id);
        records.push(record);
        records.sort_by(|a, b| a.id.cmp(&b.id));
        write_json_atomic(&self.index_path(), &records)
            .await
            .with_context(|| format!("write {CATALOG_INDEX_FILE}"))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
