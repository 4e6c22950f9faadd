use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Datelike as _, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::config::CatalogSpec;
use crate::formats::{CatalogRecord, PageRecord};
use crate::worker::{COVER_FILE_NAME, PAGES_DIR_NAME, PageState, PageTask, page_file_name};

/// URL prefix under which the HTTP layer serves the data dir.
pub const PUBLIC_PREFIX: &str = "/newsletters";

static PERIOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"perioada-(\d{2})-(\d{2})-(\d{2})-(\d{2})-(\d{4})").expect("valid period regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogPage {
    pub page_number: u32,
    pub image_url: Url,
    pub image_path: PathBuf,
}

/// Result of one acquisition: ordered pages, gaps allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Catalog {
    pub id: String,
    pub cover_image_path: Option<PathBuf>,
    pub pages: Vec<CatalogPage>,
}

impl Catalog {
    pub fn page_numbers(&self) -> Vec<u32> {
        self.pages.iter().map(|p| p.page_number).collect()
    }
}

/// Keeps only finished page tasks, ordered by page number. Completion order of
/// the download pool does not matter.
pub fn build_catalog(id: &str, cover_image_path: Option<PathBuf>, tasks: Vec<PageTask>) -> Catalog {
    let mut pages: Vec<CatalogPage> = tasks
        .into_iter()
        .filter(|task| task.state() == &PageState::Done)
        .filter_map(|task| {
            Some(CatalogPage {
                page_number: task.page_number()?,
                image_url: task.image_url()?.clone(),
                image_path: task.local_path()?.to_path_buf(),
            })
        })
        .collect();
    pages.sort_by_key(|page| page.page_number);
    pages.dedup_by_key(|page| page.page_number);

    Catalog {
        id: id.to_owned(),
        cover_image_path,
        pages,
    }
}

/// Display metadata of a catalog, from its config or derived from id and URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogMetadata {
    pub store: String,
    pub title: String,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityPeriod {
    pub from: NaiveDate,
    pub until: NaiveDate,
}

impl ValidityPeriod {
    /// `DD.MM-DD.MM.YYYY`
    pub fn label(&self) -> String {
        format!(
            "{}-{}",
            self.from.format("%d.%m"),
            self.until.format("%d.%m.%Y")
        )
    }
}

/// Finds `perioada-DD-MM-DD-MM-YYYY` in `text`. The year belongs to the end
/// date; a start month after the end month falls in the previous year.
pub fn parse_period(text: &str) -> Option<ValidityPeriod> {
    let caps = PERIOD_RE.captures(text)?;
    let num = |i: usize| caps.get(i)?.as_str().parse::<u32>().ok();
    let year = i32::try_from(num(5)?).ok()?;
    let until = NaiveDate::from_ymd_opt(year, num(4)?, num(3)?)?;
    let mut from = NaiveDate::from_ymd_opt(year, num(2)?, num(1)?)?;
    if from > until {
        from = NaiveDate::from_ymd_opt(year - 1, from.month(), from.day())?;
    }
    Some(ValidityPeriod { from, until })
}

/// `lidl-20250106` -> `Lidl`.
pub fn derive_store(id: &str) -> String {
    let prefix = id.split('-').next().unwrap_or(id);
    let mut chars = prefix.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => id.to_owned(),
    }
}

impl CatalogMetadata {
    pub fn derive(spec: &CatalogSpec) -> Self {
        let period = [
            spec.id.as_str(),
            spec.first_page_url.as_str(),
            spec.cover_image_url.as_str(),
            spec.last_page_url.as_str(),
        ]
        .into_iter()
        .find_map(parse_period);

        let store = spec
            .store
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| derive_store(&spec.id), str::to_owned);

        let configured_date = |raw: Option<&str>| {
            raw.and_then(|v| NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").ok())
        };
        let valid_from = configured_date(spec.valid_from.as_deref()).or(period.map(|p| p.from));
        let valid_until = configured_date(spec.valid_until.as_deref()).or(period.map(|p| p.until));

        let title = match spec.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => title.to_owned(),
            None => match period {
                Some(period) => format!("{store} catalog {}", period.label()),
                None => spec.id.clone(),
            },
        };

        Self {
            store,
            title,
            valid_from,
            valid_until,
        }
    }
}

fn public_path(id: &str, relative: &Path) -> String {
    let mut path = format!("{PUBLIC_PREFIX}/{id}");
    for part in relative.components() {
        path.push('/');
        path.push_str(&part.as_os_str().to_string_lossy());
    }
    path
}

/// Builds the persisted record. A missing cover falls back to the first page.
pub fn to_record(
    catalog: &Catalog,
    metadata: &CatalogMetadata,
    pages_expected: Option<usize>,
    now: DateTime<Utc>,
) -> CatalogRecord {
    let pages: Vec<PageRecord> = catalog
        .pages
        .iter()
        .map(|page| PageRecord {
            page_number: page.page_number,
            image_path: public_path(
                &catalog.id,
                &Path::new(PAGES_DIR_NAME).join(page_file_name(page.page_number)),
            ),
        })
        .collect();

    let cover_image_path = match (&catalog.cover_image_path, pages.first()) {
        (Some(_), _) => public_path(&catalog.id, Path::new(COVER_FILE_NAME)),
        (None, Some(first)) => first.image_path.clone(),
        (None, None) => String::new(),
    };

    let date = |d: Option<NaiveDate>| d.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default();

    CatalogRecord {
        id: catalog.id.clone(),
        store: metadata.store.clone(),
        title: metadata.title.clone(),
        valid_from: date(metadata.valid_from),
        valid_until: date(metadata.valid_until),
        cover_image_path,
        pages,
        last_updated: now,
        pages_expected,
    }
}
