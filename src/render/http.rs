use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use url::Url;

use crate::error::RenderError;
use crate::render::{PageRenderer, RenderedDocument, WaitPolicy};

/// Fetches server-rendered HTML directly. There is no client-side code to wait
/// for, so only the timeout part of the wait policy applies.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build renderer http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn render(&self, url: &Url, wait: &WaitPolicy) -> Result<RenderedDocument, RenderError> {
        let unreachable = |err: reqwest::Error| RenderError::Unreachable {
            url: url.to_string(),
            message: err.to_string(),
        };

        let fetch = async {
            let resp = self
                .client
                .get(url.clone())
                .header(USER_AGENT, crate::fetch::USER_AGENT_VALUE)
                .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
                .send()
                .await
                .map_err(unreachable)?;
            let status = resp.status();
            if !status.is_success() {
                return Err(RenderError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            let final_url = resp.url().clone();
            let html = resp.text().await.map_err(unreachable)?;
            Ok::<_, RenderError>((final_url, html))
        };

        let (final_url, html) = tokio::time::timeout(wait.timeout, fetch)
            .await
            .map_err(|_| RenderError::Timeout {
                url: url.to_string(),
                millis: wait.timeout.as_millis(),
            })??;

        Ok(RenderedDocument::from_html(final_url, html))
    }
}
