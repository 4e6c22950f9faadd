use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::RenderError;

pub mod http;
pub mod service;

pub use http::HttpRenderer;
pub use service::RenderServiceRenderer;

/// How long a renderer may take and how long it lets client-side code settle.
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    pub settle: Duration,
    pub timeout: Duration,
    pub wait_for_selector: Option<String>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
            wait_for_selector: None,
        }
    }
}

/// An `<img>` as laid out by the renderer. `src` is the raw attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub src: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl RenderedImage {
    pub fn area(&self) -> Option<u64> {
        Some(u64::from(self.width?) * u64::from(self.height?))
    }
}

#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub url: Url,
    pub html: String,
    pub images: Vec<RenderedImage>,
}

impl RenderedDocument {
    /// Builds a document from final HTML, measuring images from their layout
    /// attributes (`width`/`height`, `data-width`/`data-height`, inline style).
    pub fn from_html(url: Url, html: String) -> Self {
        let images = {
            let doc = Html::parse_document(&html);
            measure_images(&doc)
        };
        Self { url, html, images }
    }

    pub fn parse(&self) -> Html {
        Html::parse_document(&self.html)
    }

    /// Runs `query` against the parsed DOM and returns its answer. This is the
    /// in-process counterpart of evaluating a script inside the page.
    pub fn evaluate<T>(&self, query: impl FnOnce(&PageView<'_>) -> T) -> T {
        let html = self.parse();
        query(&PageView {
            url: &self.url,
            html: &html,
            images: &self.images,
        })
    }
}

/// Everything a DOM query may inspect on one rendered page.
pub struct PageView<'a> {
    pub url: &'a Url,
    pub html: &'a Html,
    pub images: &'a [RenderedImage],
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn render(&self, url: &Url, wait: &WaitPolicy) -> Result<RenderedDocument, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RendererKind {
    Http,
    Service,
}

pub fn build_renderer(
    kind: RendererKind,
    endpoint: Option<&str>,
    token: Option<&str>,
) -> anyhow::Result<Arc<dyn PageRenderer>> {
    match kind {
        RendererKind::Http => Ok(Arc::new(HttpRenderer::new().context("build http renderer")?)),
        RendererKind::Service => {
            let endpoint = endpoint
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow::anyhow!("render endpoint is required for the service renderer"))?;
            let endpoint = Url::parse(endpoint).context("parse render endpoint")?;
            Ok(Arc::new(
                RenderServiceRenderer::new(endpoint, token.map(str::to_owned))
                    .context("build render service client")?,
            ))
        }
    }
}

fn measure_images(doc: &Html) -> Vec<RenderedImage> {
    let Ok(selector) = Selector::parse("img") else {
        return Vec::new();
    };
    doc.select(&selector)
        .filter_map(|img| {
            let src = image_source(&img)?;
            let width = dimension(&img, "width");
            let height = dimension(&img, "height");
            Some(RenderedImage { src, width, height })
        })
        .collect()
}

/// `src`, falling back to lazy-loading `data-src`.
pub(crate) fn image_source(img: &ElementRef<'_>) -> Option<String> {
    ["src", "data-src"]
        .iter()
        .filter_map(|attr| img.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_owned)
}

fn dimension(img: &ElementRef<'_>, name: &str) -> Option<u32> {
    let element = img.value();
    if let Some(v) = element.attr(name).and_then(parse_pixels) {
        return Some(v);
    }
    if let Some(v) = element
        .attr(&format!("data-{name}"))
        .and_then(parse_pixels)
    {
        return Some(v);
    }
    let style = element.attr("style")?;
    style.split(';').find_map(|decl| {
        let (prop, value) = decl.split_once(':')?;
        if prop.trim().eq_ignore_ascii_case(name) {
            parse_pixels(value)
        } else {
            None
        }
    })
}

fn parse_pixels(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let number = raw.strip_suffix("px").unwrap_or(raw).trim();
    if let Ok(v) = number.parse::<u32>() {
        return Some(v);
    }
    let v = number.parse::<f64>().ok()?;
    (v.is_finite() && v >= 0.0).then_some(v.round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_attribute_data_and_style_dimensions() {
        let html = r#"<html><body>
            <img src="/a.jpg" width="800" height="1100">
            <img data-src="/b.jpg" data-width="640px" data-height="900px">
            <img src="/c.jpg" style="width: 1024.4px; height:1400px">
            <img src="/d.png">
            <img alt="no source">
        </body></html>"#;
        let doc = RenderedDocument::from_html(
            Url::parse("https://flyers.example.com/page/1").unwrap(),
            html.to_string(),
        );

        assert_eq!(
            doc.images,
            vec![
                RenderedImage {
                    src: "/a.jpg".to_string(),
                    width: Some(800),
                    height: Some(1100)
                },
                RenderedImage {
                    src: "/b.jpg".to_string(),
                    width: Some(640),
                    height: Some(900)
                },
                RenderedImage {
                    src: "/c.jpg".to_string(),
                    width: Some(1024),
                    height: Some(1400)
                },
                RenderedImage {
                    src: "/d.png".to_string(),
                    width: None,
                    height: None
                },
            ]
        );
        assert_eq!(doc.images[0].area(), Some(880_000));
        assert_eq!(doc.images[3].area(), None);
    }

    #[test]
    fn service_renderer_requires_endpoint() {
        let err = build_renderer(RendererKind::Service, None, None)
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("render endpoint is required"));
    }
}
