use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use serde::Serialize;
use url::Url;

use crate::error::RenderError;
use crate::render::{PageRenderer, RenderedDocument, WaitPolicy};

/// Delegates rendering to a headless-browser service that exposes a
/// browserless-style `POST /content` endpoint returning the settled DOM.
#[derive(Debug, Clone)]
pub struct RenderServiceRenderer {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest<'a> {
    url: &'a str,
    wait_for_timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_selector: Option<WaitForSelector<'a>>,
    goto_options: GotoOptions,
}

#[derive(Debug, Serialize)]
struct WaitForSelector<'a> {
    selector: &'a str,
    timeout: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GotoOptions {
    wait_until: &'static str,
    timeout: u64,
}

impl RenderServiceRenderer {
    pub fn new(endpoint: Url, token: Option<String>) -> anyhow::Result<Self> {
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            anyhow::bail!("render endpoint must be http/https: {endpoint}");
        }
        let client = reqwest::Client::builder()
            .build()
            .context("build render service http client")?;
        Ok(Self {
            client,
            endpoint,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn request_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        url
    }
}

#[async_trait]
impl PageRenderer for RenderServiceRenderer {
    fn name(&self) -> &'static str {
        "service"
    }

    async fn render(&self, url: &Url, wait: &WaitPolicy) -> Result<RenderedDocument, RenderError> {
        let timeout_ms = u64::try_from(wait.timeout.as_millis()).unwrap_or(u64::MAX);
        let body = ContentRequest {
            url: url.as_str(),
            wait_for_timeout: u64::try_from(wait.settle.as_millis()).unwrap_or(u64::MAX),
            wait_for_selector: wait
                .wait_for_selector
                .as_deref()
                .map(|selector| WaitForSelector {
                    selector,
                    timeout: timeout_ms,
                }),
            goto_options: GotoOptions {
                wait_until: "networkidle2",
                timeout: timeout_ms,
            },
        };

        let resp = self
            .client
            .post(self.request_url())
            .header(USER_AGENT, crate::fetch::USER_AGENT_VALUE)
            .timeout(wait.timeout + wait.settle)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RenderError::Timeout {
                        url: url.to_string(),
                        millis: (wait.timeout + wait.settle).as_millis(),
                    }
                } else {
                    RenderError::Unreachable {
                        url: url.to_string(),
                        message: err.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            tracing::debug!(%url, %status, "render service rejected request");
            return Err(RenderError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = resp.text().await.map_err(|err| RenderError::Unreachable {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        Ok(RenderedDocument::from_html(url.clone(), html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_request_uses_service_field_names() {
        let body = ContentRequest {
            url: "https://flyers.example.com/page/1",
            wait_for_timeout: 3000,
            wait_for_selector: Some(WaitForSelector {
                selector: "img",
                timeout: 30000,
            }),
            goto_options: GotoOptions {
                wait_until: "networkidle2",
                timeout: 30000,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["waitForTimeout"], 3000);
        assert_eq!(json["waitForSelector"]["selector"], "img");
        assert_eq!(json["gotoOptions"]["waitUntil"], "networkidle2");
    }

    #[test]
    fn token_is_appended_as_query_parameter() {
        let renderer = RenderServiceRenderer::new(
            Url::parse("http://127.0.0.1:3000/content").unwrap(),
            Some("secret".to_string()),
        )
        .unwrap();
        assert_eq!(
            renderer.request_url().as_str(),
            "http://127.0.0.1:3000/content?token=secret"
        );
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let err = RenderServiceRenderer::new(Url::parse("ftp://host/content").unwrap(), None)
            .unwrap_err()
            .to_string();
        assert!(err.contains("must be http/https"));
    }
}
