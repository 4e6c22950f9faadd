use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::time::Instant;
use url::Url;

use crate::error::AcquireError;
use crate::fetch::AssetFetcher;
use crate::locate::{ImageLocator, Located};
use crate::render::{PageRenderer, WaitPolicy};

pub const COVER_FILE_NAME: &str = "cover-image.jpg";
pub const PAGES_DIR_NAME: &str = "pages";

pub fn page_file_name(page_number: u32) -> String {
    format!("page-{page_number:02}.jpg")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "page")]
pub enum Target {
    Page(u32),
    Cover,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page(n) => write!(f, "page {n}"),
            Self::Cover => f.write_str("cover"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Render,
    Locate,
    Fetch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
    Pending,
    Rendering,
    Located,
    Fetching,
    Done,
    Failed(FailureStage),
}

impl PageState {
    pub fn can_advance_to(&self, next: &PageState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Rendering)
                | (Self::Rendering, Self::Located)
                | (Self::Rendering, Self::Failed(_))
                | (Self::Located, Self::Fetching)
                | (Self::Located, Self::Failed(_))
                | (Self::Fetching, Self::Done)
                | (Self::Fetching, Self::Failed(_))
        )
    }
}

/// One page (or the cover) moving through render, locate and fetch.
#[derive(Debug, Clone)]
pub struct PageTask {
    pub target: Target,
    state: PageState,
    page_url: Option<Url>,
    image_url: Option<Url>,
    located_by: Option<&'static str>,
    local_path: Option<PathBuf>,
    error: Option<String>,
}

impl PageTask {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            state: PageState::Pending,
            page_url: None,
            image_url: None,
            located_by: None,
            local_path: None,
            error: None,
        }
    }

    pub fn state(&self) -> &PageState {
        &self.state
    }

    pub fn page_url(&self) -> Option<&Url> {
        self.page_url.as_ref()
    }

    pub fn image_url(&self) -> Option<&Url> {
        self.image_url.as_ref()
    }

    pub fn located_by(&self) -> Option<&'static str> {
        self.located_by
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn page_number(&self) -> Option<u32> {
        match self.target {
            Target::Page(n) => Some(n),
            Target::Cover => None,
        }
    }

    pub fn destination(&self, catalog_dir: &Path) -> PathBuf {
        match self.target {
            Target::Page(n) => catalog_dir.join(PAGES_DIR_NAME).join(page_file_name(n)),
            Target::Cover => catalog_dir.join(COVER_FILE_NAME),
        }
    }

    fn advance(&mut self, next: PageState) -> bool {
        let allowed = self.state.can_advance_to(&next);
        debug_assert!(allowed, "illegal transition {:?} -> {next:?}", self.state);
        if !allowed {
            tracing::error!(item = %self.target, from = ?self.state, to = ?next, "illegal page state transition");
            return false;
        }
        self.state = next;
        true
    }

    pub fn start_rendering(&mut self, page_url: Url) -> bool {
        let ok = self.advance(PageState::Rendering);
        if ok {
            self.page_url = Some(page_url);
        }
        ok
    }

    pub fn mark_located(&mut self, located: Located) -> bool {
        let ok = self.advance(PageState::Located);
        if ok {
            self.image_url = Some(located.url);
            self.located_by = Some(located.strategy);
        }
        ok
    }

    pub fn start_fetching(&mut self, local_path: PathBuf) -> bool {
        let ok = self.advance(PageState::Fetching);
        if ok {
            self.local_path = Some(local_path);
        }
        ok
    }

    pub fn mark_done(&mut self) -> bool {
        self.advance(PageState::Done)
    }

    /// Ends a located task whose image an earlier page already claimed.
    pub fn mark_duplicate(&mut self) -> bool {
        let ok = self.advance(PageState::Failed(FailureStage::Locate));
        if ok {
            self.error = self
                .image_url
                .as_ref()
                .map(|url| format!("image already used by an earlier page: {url}"));
        }
        ok
    }

    pub fn mark_failed(&mut self, stage: FailureStage, err: &AcquireError) -> bool {
        let ok = self.advance(PageState::Failed(stage));
        if ok {
            self.error = Some(err.to_string());
            if stage == FailureStage::Fetch {
                self.local_path = None;
            }
        }
        ok
    }
}

/// Drives the render and locate half of a task. Borrowing the renderer keeps a
/// worker tied to the sequential phase that owns the session.
pub struct PageWorker<'a> {
    renderer: &'a dyn PageRenderer,
    locator: &'a ImageLocator,
    wait: &'a WaitPolicy,
}

impl<'a> PageWorker<'a> {
    pub fn new(
        renderer: &'a dyn PageRenderer,
        locator: &'a ImageLocator,
        wait: &'a WaitPolicy,
    ) -> Self {
        Self {
            renderer,
            locator,
            wait,
        }
    }

    /// `Pending → Rendering → Located | Failed`.
    pub async fn resolve(
        &self,
        task: &mut PageTask,
        page_url: Url,
        deadline: Instant,
    ) -> Result<Url, AcquireError> {
        task.start_rendering(page_url.clone());

        let render = self.renderer.render(&page_url, self.wait);
        let rendered = match tokio::time::timeout_at(deadline, render).await {
            Ok(Ok(doc)) => doc,
            Ok(Err(err)) => {
                let err = AcquireError::from(err);
                task.mark_failed(FailureStage::Render, &err);
                return Err(err);
            }
            Err(_) => {
                let err = AcquireError::DeadlineExceeded;
                task.mark_failed(FailureStage::Render, &err);
                return Err(err);
            }
        };

        match self.locator.locate(&rendered) {
            Ok(located) => {
                let url = located.url.clone();
                tracing::debug!(item = %task.target, %url, strategy = located.strategy, "image located");
                task.mark_located(located);
                Ok(url)
            }
            Err(err) => {
                task.mark_failed(FailureStage::Locate, &err);
                Err(err)
            }
        }
    }
}

/// `Located → Fetching → Done | Failed`. Takes the task by value so it can be
/// moved into a pool worker.
pub async fn fetch_located(
    fetcher: &AssetFetcher,
    mut task: PageTask,
    catalog_dir: &Path,
) -> PageTask {
    let Some(url) = task.image_url.clone() else {
        return task;
    };
    let destination = task.destination(catalog_dir);
    if !task.start_fetching(destination.clone()) {
        return task;
    }

    match fetcher.fetch(&url, &destination).await {
        Ok(_) => {
            task.mark_done();
        }
        Err(err) => {
            let err = AcquireError::from(err);
            tracing::warn!(item = %task.target, %url, %err, "download failed");
            task.mark_failed(FailureStage::Fetch, &err);
        }
    }
    task
}

#[cfg(test)]
mod tests {
    use super::*;

    fn located(raw: &str) -> Located {
        Located {
            url: Url::parse(raw).unwrap(),
            strategy: "size-ranked",
        }
    }

    #[test]
    fn happy_path_visits_every_state_in_order() {
        let mut task = PageTask::new(Target::Page(3));
        assert_eq!(task.state(), &PageState::Pending);
        assert!(task.start_rendering(Url::parse("https://f.example.com/page/3").unwrap()));
        assert!(task.mark_located(located("https://cdn.example.com/3.jpg")));
        assert!(task.start_fetching(PathBuf::from("/tmp/x/pages/page-03.jpg")));
        assert!(task.mark_done());
        assert_eq!(task.state(), &PageState::Done);
        assert_eq!(task.located_by(), Some("size-ranked"));
        assert_eq!(task.local_path(), Some(Path::new("/tmp/x/pages/page-03.jpg")));
    }

    #[test]
    fn transition_table_forbids_skips_and_reversals() {
        use PageState::*;
        assert!(!Pending.can_advance_to(&Located));
        assert!(!Pending.can_advance_to(&Failed(FailureStage::Render)));
        assert!(!Rendering.can_advance_to(&Fetching));
        assert!(!Located.can_advance_to(&Rendering));
        assert!(!Done.can_advance_to(&Failed(FailureStage::Fetch)));
        assert!(!Failed(FailureStage::Render).can_advance_to(&Rendering));
        assert!(Located.can_advance_to(&Failed(FailureStage::Fetch)));
    }

    #[test]
    fn fetch_failure_clears_local_path_and_keeps_error() {
        let mut task = PageTask::new(Target::Page(1));
        task.start_rendering(Url::parse("https://f.example.com/page/1").unwrap());
        task.mark_located(located("https://cdn.example.com/1.jpg"));
        task.start_fetching(PathBuf::from("pages/page-01.jpg"));
        let err = AcquireError::Download(crate::error::DownloadError::Status {
            url: "https://cdn.example.com/1.jpg".to_string(),
            status: 503,
        });
        assert!(task.mark_failed(FailureStage::Fetch, &err));
        assert_eq!(task.state(), &PageState::Failed(FailureStage::Fetch));
        assert!(task.local_path().is_none());
        assert!(task.error().unwrap().contains("503"));
    }

    #[test]
    fn duplicate_ends_located_task() {
        let mut task = PageTask::new(Target::Page(4));
        task.start_rendering(Url::parse("https://f.example.com/page/4").unwrap());
        task.mark_located(located("https://cdn.example.com/3.jpg"));
        assert!(task.mark_duplicate());
        assert_eq!(task.state(), &PageState::Failed(FailureStage::Locate));
        assert!(task.error().unwrap().contains("https://cdn.example.com/3.jpg"));
        assert!(!task.state().can_advance_to(&PageState::Fetching));
    }

    #[test]
    fn destinations_are_deterministic() {
        let dir = Path::new("/data/lidl-1");
        assert_eq!(
            PageTask::new(Target::Page(7)).destination(dir),
            dir.join("pages").join("page-07.jpg")
        );
        assert_eq!(
            PageTask::new(Target::Page(112)).destination(dir),
            dir.join("pages").join("page-112.jpg")
        );
        assert_eq!(
            PageTask::new(Target::Cover).destination(dir),
            dir.join("cover-image.jpg")
        );
    }
}
