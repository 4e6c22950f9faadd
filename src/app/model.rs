use serde::{Deserialize, Serialize};

use crate::coordinator::{PageDiagnostic, StopReason};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Processing,
}

/// Immediate answer to `POST /api/scrape/:store`; the run continues in the
/// background.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeAccepted {
    pub message: String,
    pub status: ScrapeStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoresResponse {
    pub configs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// What one acquisition produced, as printed by the CLI and logged by the
/// server.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub catalog_id: String,
    pub pages_acquired: Vec<u32>,
    pub pages_expected: usize,
    pub cover: bool,
    pub complete: bool,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopReason>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<PageDiagnostic>,
}
