use std::collections::HashSet;

use anyhow::Context as _;
use scraper::Selector;
use url::Url;

use crate::error::AcquireError;
use crate::render::{PageView, RenderedDocument, image_source};

pub const DEFAULT_MIN_IMAGE_DIMENSION: u32 = 500;

pub const DEFAULT_SELECTORS: &[&str] = &[
    "img.page-image",
    "img.flyer-page",
    "img.leaflet-page",
    ".flyer-page img",
    ".page-image img",
    ".flyer img",
    ".leaflet img",
    ".catalog img",
    ".viewer img",
    "[class*='flyer'] img",
    "[class*='page'] img",
    "main img",
    "article img",
];

pub const DEFAULT_ASSET_HOSTS: &[&str] = &["imgproxy.leaflets.schwarz"];

/// One way of finding the dominant image of a rendered page.
pub trait LocatorStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn locate(&self, page: &PageView<'_>) -> Option<Url>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub url: Url,
    pub strategy: &'static str,
}

/// Picks the largest image whose width and height both exceed the threshold.
#[derive(Debug, Clone)]
pub struct SizeRanked {
    min_dimension: u32,
}

impl SizeRanked {
    pub fn new(min_dimension: u32) -> Self {
        Self { min_dimension }
    }
}

impl LocatorStrategy for SizeRanked {
    fn name(&self) -> &'static str {
        "size-ranked"
    }

    fn locate(&self, page: &PageView<'_>) -> Option<Url> {
        let mut best: Option<(u64, Url)> = None;
        for image in page.images {
            let (Some(width), Some(height), Some(area)) = (image.width, image.height, image.area())
            else {
                continue;
            };
            if width <= self.min_dimension || height <= self.min_dimension {
                continue;
            }
            if is_vector_or_inline(&image.src) {
                continue;
            }
            let Some(url) = absolutize(page.url, &image.src) else {
                continue;
            };
            if best.as_ref().is_none_or(|(best_area, _)| area > *best_area) {
                best = Some((area, url));
            }
        }
        best.map(|(_, url)| url)
    }
}

/// Tries CSS selectors in order, from specific class names to landmarks.
#[derive(Debug, Clone)]
pub struct SelectorChain {
    selectors: Vec<(String, Selector)>,
}

impl SelectorChain {
    pub fn new<S: AsRef<str>>(selectors: &[S]) -> anyhow::Result<Self> {
        let selectors = selectors
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                Selector::parse(raw)
                    .map(|selector| (raw.to_owned(), selector))
                    .map_err(|err| anyhow::anyhow!("invalid selector {raw:?}: {err:?}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { selectors })
    }
}

impl LocatorStrategy for SelectorChain {
    fn name(&self) -> &'static str {
        "selector-chain"
    }

    fn locate(&self, page: &PageView<'_>) -> Option<Url> {
        for (raw, selector) in &self.selectors {
            let found = page
                .html
                .select(selector)
                .filter_map(|element| image_source(&element))
                .filter(|src| !is_vector_or_inline(src))
                .find_map(|src| absolutize(page.url, &src));
            if let Some(url) = found {
                tracing::debug!(selector = %raw, %url, "selector matched");
                return Some(url);
            }
        }
        None
    }
}

/// Collects every image served from a known asset host. Used for catalogs that
/// show all their pages in a single view.
#[derive(Debug, Clone)]
pub struct AssetHostScan {
    hosts: Vec<String>,
    img: Selector,
}

impl AssetHostScan {
    pub fn new<S: AsRef<str>>(hosts: &[S]) -> anyhow::Result<Self> {
        let img = Selector::parse("img").map_err(|err| anyhow::anyhow!("img selector: {err:?}"))?;
        Ok(Self {
            hosts: hosts
                .iter()
                .map(|h| h.as_ref().trim().to_owned())
                .filter(|h| !h.is_empty())
                .collect(),
            img,
        })
    }

    pub fn scan(&self, page: &PageView<'_>) -> Vec<Url> {
        let mut seen = HashSet::new();
        page.html
            .select(&self.img)
            .filter_map(|element| image_source(&element))
            .filter(|src| !is_vector_or_inline(src))
            .filter_map(|src| absolutize(page.url, &src))
            .filter(|url| self.hosts.iter().any(|host| url.as_str().contains(host.as_str())))
            .filter(|url| seen.insert(url.to_string()))
            .collect()
    }

    pub fn scan_document(&self, doc: &RenderedDocument) -> Vec<Url> {
        doc.evaluate(|page| self.scan(page))
    }
}

impl LocatorStrategy for AssetHostScan {
    fn name(&self) -> &'static str {
        "asset-host-scan"
    }

    fn locate(&self, page: &PageView<'_>) -> Option<Url> {
        self.scan(page).into_iter().next()
    }
}

pub struct ImageLocator {
    strategies: Vec<Box<dyn LocatorStrategy>>,
    bulk: AssetHostScan,
}

impl ImageLocator {
    pub fn new(strategies: Vec<Box<dyn LocatorStrategy>>, bulk: AssetHostScan) -> Self {
        Self { strategies, bulk }
    }

    /// Size-ranked scan, then the selector chain.
    pub fn standard<S: AsRef<str>, H: AsRef<str>>(
        min_dimension: u32,
        selectors: &[S],
        asset_hosts: &[H],
    ) -> anyhow::Result<Self> {
        let chain = SelectorChain::new(selectors).context("build selector chain")?;
        let bulk = AssetHostScan::new(asset_hosts).context("build asset host scan")?;
        Ok(Self::new(
            vec![Box::new(SizeRanked::new(min_dimension)), Box::new(chain)],
            bulk,
        ))
    }

    pub fn locate(&self, doc: &RenderedDocument) -> Result<Located, AcquireError> {
        let found = doc.evaluate(|page| {
            self.strategies.iter().find_map(|strategy| {
                let url = strategy.locate(page);
                if url.is_none() {
                    tracing::debug!(strategy = strategy.name(), url = %page.url, "strategy found nothing");
                }
                url.map(|url| Located {
                    url,
                    strategy: strategy.name(),
                })
            })
        });
        found.ok_or_else(|| AcquireError::NoImageFound {
            url: doc.url.to_string(),
        })
    }

    pub fn scan_all(&self, doc: &RenderedDocument) -> Vec<Url> {
        self.bulk.scan_document(doc)
    }
}

/// Resolves `src` against the URL of the page that referenced it.
pub fn absolutize(page_url: &Url, src: &str) -> Option<Url> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    let url = page_url.join(src).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn is_vector_or_inline(src: &str) -> bool {
    let lower = src.trim().to_ascii_lowercase();
    if lower.starts_with("data:") {
        return true;
    }
    let path = lower.split(['?', '#']).next().unwrap_or_default();
    path.ends_with(".svg")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(html: &str) -> RenderedDocument {
        RenderedDocument::from_html(
            Url::parse("https://flyers.example.com/catalog/view/flyer/page/2").unwrap(),
            html.to_string(),
        )
    }

    fn locator() -> ImageLocator {
        ImageLocator::standard(
            DEFAULT_MIN_IMAGE_DIMENSION,
            DEFAULT_SELECTORS,
            DEFAULT_ASSET_HOSTS,
        )
        .unwrap()
    }

    #[test]
    fn size_ranked_picks_largest_area_above_threshold() {
        let page = doc(r#"<body>
            <img src="/logo.png" width="120" height="40">
            <img src="/wide.jpg" width="1600" height="400">
            <img src="/page-small.jpg" width="600" height="800">
            <img src="/page-large.jpg" width="900" height="1200">
        </body>"#);
        let located = locator().locate(&page).unwrap();
        assert_eq!(located.strategy, "size-ranked");
        assert_eq!(located.url.as_str(), "https://flyers.example.com/page-large.jpg");
    }

    #[test]
    fn threshold_is_exclusive() {
        let page = doc(r#"<body><img src="/edge.jpg" width="500" height="900"></body>"#);
        let strategy = SizeRanked::new(500);
        assert_eq!(page.evaluate(|view| strategy.locate(view)), None);
    }

    #[test]
    fn falls_back_to_selector_chain_main_img() {
        let page = doc(r#"<body>
            <header><img src="/logo.svg"></header>
            <main><img src="images/p2.jpg"></main>
        </body>"#);
        let located = locator().locate(&page).unwrap();
        assert_eq!(located.strategy, "selector-chain");
        assert_eq!(
            located.url.as_str(),
            "https://flyers.example.com/catalog/view/flyer/page/images/p2.jpg"
        );
    }

    #[test]
    fn selector_chain_prefers_specific_classes_and_skips_svg() {
        let page = doc(r#"<body>
            <main><img src="/generic.jpg"></main>
            <div class="flyer"><img src="/icon.svg?v=2"><img data-src="//cdn.example.net/p.jpg"></div>
        </body>"#);
        let located = locator().locate(&page).unwrap();
        assert_eq!(located.url.as_str(), "https://cdn.example.net/p.jpg");
    }

    #[test]
    fn no_image_found_when_chain_is_exhausted() {
        let page = doc(r#"<body><nav><img src="/logo.svg"></nav><p>empty</p></body>"#);
        let err = locator().locate(&page).unwrap_err();
        assert!(matches!(err, AcquireError::NoImageFound { .. }));
    }

    #[test]
    fn bulk_scan_dedups_asset_host_images() {
        let page = doc(r#"<body>
            <img src="https://imgproxy.leaflets.schwarz/a.jpg">
            <img src="https://static.example.com/banner.jpg">
            <img src="https://imgproxy.leaflets.schwarz/b.jpg">
            <img src="https://imgproxy.leaflets.schwarz/a.jpg">
        </body>"#);
        let urls = locator().scan_all(&page);
        assert_eq!(
            urls.iter().map(Url::as_str).collect::<Vec<_>>(),
            vec![
                "https://imgproxy.leaflets.schwarz/a.jpg",
                "https://imgproxy.leaflets.schwarz/b.jpg"
            ]
        );
    }

    #[test]
    fn absolutize_uses_page_scheme_and_host() {
        let page = Url::parse("http://shop.example.org/flyer/page/1").unwrap();
        assert_eq!(
            absolutize(&page, "/img/1.jpg").unwrap().as_str(),
            "http://shop.example.org/img/1.jpg"
        );
        assert_eq!(
            absolutize(&page, "https://cdn.example.net/x.jpg").unwrap().as_str(),
            "https://cdn.example.net/x.jpg"
        );
        assert_eq!(
            absolutize(&page, "images/p2.jpg").unwrap().as_str(),
            "http://shop.example.org/flyer/page/images/p2.jpg"
        );
        assert_eq!(absolutize(&page, "  "), None);
        assert_eq!(absolutize(&page, "javascript:void(0)"), None);
    }

    #[test]
    fn invalid_selector_is_rejected() {
        let err = SelectorChain::new(&["main img", "[[["]).unwrap_err().to_string();
        assert!(err.contains("invalid selector"));
    }
}
