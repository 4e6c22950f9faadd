use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One catalog as served by the API and stored in `newsletters.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    pub id: String,
    pub store: String,
    pub title: String,
    #[serde(default)]
    pub valid_from: String,
    #[serde(default)]
    pub valid_until: String,
    #[serde(rename = "coverImage", default)]
    pub cover_image_path: String,
    pub pages: Vec<PageRecord>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages_expected: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub page_number: u32,
    #[serde(rename = "imageUrl")]
    pub image_path: String,
}
