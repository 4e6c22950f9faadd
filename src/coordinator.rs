use std::collections::{BTreeSet, HashSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use url::Url;

use crate::assemble::{Catalog, build_catalog};
use crate::config::{AcquisitionMode, AcquisitionSettings, CatalogSpec};
use crate::error::AcquireError;
use crate::fetch::{AssetFetcher, is_partial, partial_path, remove_files_matching, remove_if_exists};
use crate::locate::{AssetHostScan, ImageLocator, Located};
use crate::render::PageRenderer;
use crate::templater::{PagePattern, PageRange};
use crate::worker::{
    COVER_FILE_NAME, FailureStage, PAGES_DIR_NAME, PageState, PageTask, PageWorker, Target,
    fetch_located,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Omission {
    Failed(FailureStage),
    Duplicate,
    NotAttempted,
}

/// Why one page (or the cover) is missing from the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct PageDiagnostic {
    pub target: Target,
    pub omission: Omission,
    pub message: String,
}

impl PageDiagnostic {
    fn from_task(task: &PageTask) -> Self {
        let omission = match task.state() {
            PageState::Failed(stage) => Omission::Failed(*stage),
            _ => Omission::NotAttempted,
        };
        Self {
            target: task.target,
            omission,
            message: task.error().unwrap_or("not attempted before deadline").to_owned(),
        }
    }

    fn not_attempted(target: Target) -> Self {
        Self {
            target,
            omission: Omission::NotAttempted,
            message: "not attempted before deadline".to_owned(),
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self.omission, Omission::Duplicate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The same resolution (one image URL, or nothing) repeated.
    StaleResolutions { at_page: u32 },
    MaxPages,
    Deadline,
}

#[derive(Debug, Clone)]
pub struct AcquisitionReport {
    pub catalog: Catalog,
    pub diagnostics: Vec<PageDiagnostic>,
    /// Page indices handed to the renderer, in request order.
    pub visited_pages: Vec<u32>,
    pub stop: Option<StopReason>,
    pub pages_expected: usize,
}

#[derive(Debug, Clone)]
pub struct PartialFailureReport {
    pub catalog: Catalog,
    pub diagnostics: Vec<PageDiagnostic>,
}

#[derive(Debug, Clone)]
pub enum AcquisitionOutcome {
    Complete(Catalog),
    Partial(PartialFailureReport),
}

impl AcquisitionOutcome {
    pub fn catalog(&self) -> &Catalog {
        match self {
            Self::Complete(catalog) => catalog,
            Self::Partial(report) => &report.catalog,
        }
    }
}

impl AcquisitionReport {
    pub fn is_complete(&self) -> bool {
        !self.diagnostics.iter().any(PageDiagnostic::is_failure)
    }

    pub fn into_outcome(self) -> AcquisitionOutcome {
        if self.is_complete() {
            AcquisitionOutcome::Complete(self.catalog)
        } else {
            AcquisitionOutcome::Partial(PartialFailureReport {
                catalog: self.catalog,
                diagnostics: self.diagnostics,
            })
        }
    }
}

/// Watches page resolutions for the end of a catalog. A resolution is an image
/// URL or nothing at all; it is stale when it is nothing or a URL an earlier
/// page already used. Either a run of identical resolutions or a run of stale
/// ones ends the iteration.
#[derive(Debug)]
struct StaleRun {
    threshold: usize,
    last: Option<Option<String>>,
    identical: usize,
    stale: usize,
}

impl StaleRun {
    fn new(threshold: usize) -> Self {
        Self {
            threshold,
            last: None,
            identical: 0,
            stale: 0,
        }
    }

    fn observe(&mut self, resolution: Option<&Url>, already_seen: bool) -> bool {
        if self.threshold == 0 {
            return false;
        }
        let key = resolution.map(Url::to_string);
        if self.last.as_ref() == Some(&key) {
            self.identical += 1;
        } else {
            self.identical = 1;
        }
        if key.is_none() || already_seen {
            self.stale += 1;
        } else {
            self.stale = 0;
        }
        // A single fresh URL is never a run.
        let needed = if key.is_some() {
            self.threshold.max(2)
        } else {
            self.threshold
        };
        self.last = Some(key);
        self.identical >= needed || self.stale >= self.threshold
    }
}

struct LocatedPages {
    tasks: Vec<PageTask>,
    visited: Vec<u32>,
    stop: Option<StopReason>,
}

pub struct Coordinator {
    renderer: Arc<dyn PageRenderer>,
    fetcher: AssetFetcher,
    locator: ImageLocator,
    pattern: PagePattern,
    settings: AcquisitionSettings,
    data_dir: PathBuf,
}

impl Coordinator {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        fetcher: AssetFetcher,
        settings: AcquisitionSettings,
        data_dir: impl Into<PathBuf>,
    ) -> anyhow::Result<Self> {
        let locator = ImageLocator::standard(
            settings.min_image_dimension,
            &settings.selectors,
            &settings.asset_hosts,
        )
        .context("build image locator")?;
        let pattern = settings.page_pattern().context("build page pattern")?;
        Ok(Self {
            renderer,
            fetcher,
            locator,
            pattern,
            settings,
            data_dir: data_dir.into(),
        })
    }

    pub fn catalog_dir(&self, id: &str) -> PathBuf {
        self.data_dir.join(id)
    }

    /// Runs one acquisition and folds it into a complete catalog or a partial
    /// failure report.
    pub async fn run(&self, spec: &CatalogSpec) -> Result<AcquisitionOutcome, AcquireError> {
        self.run_report(spec).await.map(AcquisitionReport::into_outcome)
    }

    /// Like [`Coordinator::run`], keeping run details such as the visited
    /// pages and the stop reason.
    pub async fn run_report(
        &self,
        spec: &CatalogSpec,
    ) -> Result<AcquisitionReport, AcquireError> {
        spec.validate_id()?;
        let range = PageRange::from_urls(&spec.first_page_url, &spec.last_page_url, &self.pattern)?;
        let deadline = Instant::now() + self.settings.deadline;

        let catalog_dir = self.catalog_dir(&spec.id);
        let pages_dir = catalog_dir.join(PAGES_DIR_NAME);
        tokio::fs::create_dir_all(&pages_dir)
            .await
            .map_err(|source| AcquireError::Io {
                path: pages_dir.clone(),
                source,
            })?;

        tracing::info!(
            catalog_id = %spec.id,
            first = range.first,
            last = range.last,
            mode = ?spec.mode,
            renderer = self.renderer.name(),
            "starting acquisition"
        );

        let worker = PageWorker::new(self.renderer.as_ref(), &self.locator, &self.settings.wait);
        let mut diagnostics = Vec::new();

        let mut cover = PageTask::new(Target::Cover);
        let cover_fetch = match worker
            .resolve(&mut cover, spec.cover_image_url.clone(), deadline)
            .await
        {
            Ok(_) => {
                let fetcher = self.fetcher.clone();
                let dir = catalog_dir.clone();
                Some(tokio::spawn(async move {
                    fetch_located(&fetcher, cover, &dir).await
                }))
            }
            Err(err) => {
                tracing::warn!(catalog_id = %spec.id, %err, "cover omitted");
                diagnostics.push(PageDiagnostic::from_task(&cover));
                None
            }
        };

        let located = match spec.mode {
            AcquisitionMode::PerPage => {
                self.resolve_pages(&worker, &range, deadline, &mut diagnostics)
                    .await?
            }
            AcquisitionMode::SingleView => {
                self.resolve_single_view(spec, &range, deadline, &mut diagnostics)
                    .await
            }
        };
        let pages_expected = match spec.mode {
            AcquisitionMode::PerPage => self
                .settings
                .max_pages
                .map_or(range.page_count(), |cap| cap.min(range.page_count())),
            AcquisitionMode::SingleView => located.tasks.len(),
        };

        let fetched = self
            .fetch_pages(located.tasks, &catalog_dir, deadline, &mut diagnostics)
            .await;

        let cover_path = match cover_fetch {
            Some(mut handle) => {
                let joined = tokio::time::timeout_at(deadline, &mut handle).await;
                match joined {
                    Ok(Ok(task)) if task.state() == &PageState::Done => {
                        task.local_path().map(Path::to_path_buf)
                    }
                    Ok(Ok(task)) => {
                        diagnostics.push(PageDiagnostic::from_task(&task));
                        None
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(?err, "cover download task failed");
                        diagnostics.push(PageDiagnostic::not_attempted(Target::Cover));
                        None
                    }
                    Err(_) => {
                        handle.abort();
                        // Wait for the cancelled download to release its file.
                        let _ = handle.await;
                        diagnostics.push(PageDiagnostic::not_attempted(Target::Cover));
                        None
                    }
                }
            }
            None => None,
        };

        let catalog = build_catalog(&spec.id, cover_path, fetched);
        prune_stale_outputs(&catalog_dir, &catalog).await;
        diagnostics.sort_by_key(|d| match d.target {
            Target::Cover => 0,
            Target::Page(n) => u64::from(n) + 1,
        });

        tracing::info!(
            catalog_id = %spec.id,
            pages = catalog.pages.len(),
            pages_expected,
            omitted = diagnostics.iter().filter(|d| d.is_failure()).count(),
            stop = ?located.stop,
            "acquisition finished"
        );

        Ok(AcquisitionReport {
            catalog,
            diagnostics,
            visited_pages: located.visited,
            stop: located.stop,
            pages_expected,
        })
    }

    /// Sequential phase: one render in flight, ascending page order.
    async fn resolve_pages(
        &self,
        worker: &PageWorker<'_>,
        range: &PageRange,
        deadline: Instant,
        diagnostics: &mut Vec<PageDiagnostic>,
    ) -> Result<LocatedPages, AcquireError> {
        let mut stale = StaleRun::new(self.settings.early_stop_after);
        let mut seen_urls = HashSet::new();
        let mut tasks = Vec::new();
        let mut visited = Vec::new();
        let mut stop = None;

        for (n, index) in range.indices().enumerate() {
            if self.settings.max_pages.is_some_and(|cap| n >= cap) {
                stop = Some(StopReason::MaxPages);
                break;
            }
            if n > 0 && !self.settings.page_delay.is_zero() {
                let wake = (Instant::now() + self.settings.page_delay).min(deadline);
                tokio::time::sleep_until(wake).await;
            }
            if Instant::now() >= deadline {
                tracing::warn!(page = index, "deadline reached; remaining pages not attempted");
                diagnostics.extend(
                    (index..=range.last).map(|i| PageDiagnostic::not_attempted(Target::Page(i))),
                );
                stop = Some(StopReason::Deadline);
                break;
            }

            let page_url = self.pattern.build_page_url(range.template(), index)?;
            visited.push(index);
            let mut task = PageTask::new(Target::Page(index));
            let resolution = match worker.resolve(&mut task, page_url, deadline).await {
                Ok(url) => Some(url),
                Err(err) => {
                    tracing::warn!(page = index, %err, "page omitted");
                    diagnostics.push(PageDiagnostic::from_task(&task));
                    None
                }
            };

            let duplicate = resolution
                .as_ref()
                .is_some_and(|url| !seen_urls.insert(url.to_string()));
            let stale_now = stale.observe(resolution.as_ref(), duplicate);
            if duplicate {
                task.mark_duplicate();
                tracing::debug!(page = index, url = ?task.image_url(), "duplicate image url; page skipped");
                diagnostics.push(PageDiagnostic {
                    target: task.target,
                    omission: Omission::Duplicate,
                    message: task.error().unwrap_or("duplicate image").to_owned(),
                });
            } else if resolution.is_some() {
                tasks.push(task);
            }

            if stale_now {
                tracing::info!(page = index, "repeated resolutions; assuming end of catalog");
                stop = Some(StopReason::StaleResolutions { at_page: index });
                break;
            }
        }

        Ok(LocatedPages {
            tasks,
            visited,
            stop,
        })
    }

    /// Whole-catalog variant: one render, every asset-host image becomes a page.
    async fn resolve_single_view(
        &self,
        spec: &CatalogSpec,
        range: &PageRange,
        deadline: Instant,
        diagnostics: &mut Vec<PageDiagnostic>,
    ) -> LocatedPages {
        let view_url = spec.first_page_url.clone();
        let mut visited = Vec::new();
        let first_target = Target::Page(range.first);

        visited.push(range.first);
        let render = self.renderer.render(&view_url, &self.settings.wait);
        let doc = match tokio::time::timeout_at(deadline, render).await {
            Ok(Ok(doc)) => doc,
            Ok(Err(err)) => {
                tracing::warn!(%view_url, %err, "catalog view omitted");
                diagnostics.push(PageDiagnostic {
                    target: first_target,
                    omission: Omission::Failed(FailureStage::Render),
                    message: AcquireError::from(err).to_string(),
                });
                return LocatedPages {
                    tasks: Vec::new(),
                    visited,
                    stop: None,
                };
            }
            Err(_) => {
                diagnostics.push(PageDiagnostic::not_attempted(first_target));
                return LocatedPages {
                    tasks: Vec::new(),
                    visited,
                    stop: Some(StopReason::Deadline),
                };
            }
        };

        let urls = match AssetHostScan::new(self.settings.asset_hosts_for(spec)) {
            Ok(scan) => scan.scan_document(&doc),
            Err(err) => {
                tracing::warn!(?err, "asset host scan unavailable; using run-wide hosts");
                self.locator.scan_all(&doc)
            }
        };
        if urls.is_empty() {
            diagnostics.push(PageDiagnostic {
                target: first_target,
                omission: Omission::Failed(FailureStage::Locate),
                message: AcquireError::NoImageFound {
                    url: view_url.to_string(),
                }
                .to_string(),
            });
        }

        let cap = self
            .settings
            .max_pages
            .unwrap_or(usize::MAX)
            .min(range.page_count());
        let mut stop = None;
        let mut tasks = Vec::new();
        for (offset, url) in urls.into_iter().enumerate() {
            if offset >= cap {
                stop = Some(StopReason::MaxPages);
                break;
            }
            let Some(number) = u32::try_from(offset).ok().and_then(|o| range.first.checked_add(o)) else {
                break;
            };
            let mut task = PageTask::new(Target::Page(number));
            task.start_rendering(view_url.clone());
            task.mark_located(Located {
                url,
                strategy: "asset-host-scan",
            });
            tasks.push(task);
        }

        LocatedPages {
            tasks,
            visited,
            stop,
        }
    }

    /// Parallel phase: bounded pool of independent downloads.
    async fn fetch_pages(
        &self,
        tasks: Vec<PageTask>,
        catalog_dir: &Path,
        deadline: Instant,
        diagnostics: &mut Vec<PageDiagnostic>,
    ) -> Vec<PageTask> {
        let pending: BTreeSet<Target> = tasks.iter().map(|t| t.target).collect();
        let collector: Arc<Mutex<Vec<PageTask>>> = Arc::new(Mutex::new(Vec::new()));
        let semaphore = Arc::new(Semaphore::new(self.settings.download_concurrency.max(1)));
        let mut pool = JoinSet::new();

        for task in tasks {
            let semaphore = Arc::clone(&semaphore);
            let collector = Arc::clone(&collector);
            let fetcher = self.fetcher.clone();
            let dir = catalog_dir.to_path_buf();
            pool.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if Instant::now() >= deadline {
                    collector.lock().await.push(task);
                    return;
                }
                let task = fetch_located(&fetcher, task, &dir).await;
                collector.lock().await.push(task);
            });
        }

        let drained = tokio::time::timeout_at(deadline, async {
            while let Some(joined) = pool.join_next().await {
                if let Err(err) = joined {
                    tracing::error!(?err, "download worker panicked");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(in_flight = pool.len(), "deadline reached; abandoning downloads");
            pool.abort_all();
            while pool.join_next().await.is_some() {}
        }

        let finished = std::mem::take(&mut *collector.lock().await);
        let mut missing = pending;
        let mut done = Vec::with_capacity(finished.len());
        for task in finished {
            missing.remove(&task.target);
            if task.state() == &PageState::Done {
                done.push(task);
            } else {
                diagnostics.push(PageDiagnostic::from_task(&task));
            }
        }
        diagnostics.extend(missing.into_iter().map(PageDiagnostic::not_attempted));
        done
    }
}

/// Leaves on disk only what `catalog` lists: page files from earlier runs,
/// partial downloads and a cover that was not acquired this time are removed.
/// A run without pages only clears partial downloads, so the previous catalog
/// stays servable.
async fn prune_stale_outputs(catalog_dir: &Path, catalog: &Catalog) {
    let keep_previous = catalog.pages.is_empty();
    let keep: HashSet<&OsStr> = catalog
        .pages
        .iter()
        .filter_map(|page| page.image_path.file_name())
        .collect();
    let doomed = |name: &OsStr| is_partial(name) || (!keep_previous && !keep.contains(name));
    match remove_files_matching(&catalog_dir.join(PAGES_DIR_NAME), doomed).await {
        Ok(0) => {}
        Ok(removed) => tracing::info!(catalog_id = %catalog.id, removed, "removed stale page files"),
        Err(err) => tracing::warn!(catalog_id = %catalog.id, ?err, "failed to prune page files"),
    }

    let cover = catalog_dir.join(COVER_FILE_NAME);
    let mut stray = vec![partial_path(&cover)];
    if catalog.cover_image_path.is_none() && !keep_previous {
        stray.push(cover);
    }
    for path in stray {
        if let Err(err) = remove_if_exists(&path).await {
            tracing::warn!(catalog_id = %catalog.id, ?err, "failed to remove stale cover file");
        }
    }
}
