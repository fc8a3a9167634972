use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cli::config::RenderSettings;
use crate::utils::metrics::FailureKind;

/// Slack on top of the render timeout before the HTTP call itself gives up
const HARD_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// One page to render
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: String,
    pub script: Arc<str>,
    pub wait_seconds: f64,
    pub timeout_seconds: u64,
    pub load_images: bool,
    pub resource_timeout_seconds: u64,
    /// Where to store a PNG of the page, if screenshots are wanted
    pub screenshot: Option<PathBuf>,
}

impl RenderRequest {
    pub fn new(url: &str, script: Arc<str>, settings: &RenderSettings) -> Self {
        Self {
            url: url.to_string(),
            script,
            wait_seconds: settings.wait_seconds,
            timeout_seconds: settings.timeout_seconds,
            load_images: settings.load_images,
            resource_timeout_seconds: settings.resource_timeout_seconds,
            screenshot: None,
        }
    }
}

/// Successfully rendered page
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub final_url: String,
    pub status_code: u16,
    pub screenshot: Option<PathBuf>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    #[error("render timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("non-HTML response: {0}")]
    NonHtmlContent(String),

    #[error("target returned HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl RenderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RenderError::Timeout(_) => FailureKind::Timeout,
            RenderError::Network(_) => FailureKind::Network,
            RenderError::NonHtmlContent(_) => FailureKind::NonHtml,
            RenderError::HttpStatus { .. } => FailureKind::HttpStatus,
        }
    }
}

/// Fetches and renders pages. Owns no crawl state, safe to call concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RenderClient: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError>;
}

/// Arguments of the renderer's `execute` endpoint
#[derive(Debug, Serialize)]
struct ExecuteArgs<'a> {
    url: &'a str,
    lua_source: &'a str,
    wait: f64,
    timeout: u64,
    images: u8,
    resource_timeout: u64,
    user_agent: &'a str,
}

/// Table returned by the control script
#[derive(Debug, Deserialize)]
struct ExecuteOutput {
    #[serde(default)]
    html: String,
    url: Option<String>,
    status: Option<u16>,
    content_type: Option<String>,
}

/// Client for a Splash rendering service
pub struct SplashClient {
    client: Client,
    base_url: String,
    user_agent: String,
}

impl SplashClient {
    pub fn new(settings: &RenderSettings) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.splash_url.trim_end_matches('/').to_string(),
            user_agent: settings.user_agent.clone(),
        })
    }

    fn map_transport_error(url: &str, e: reqwest::Error) -> RenderError {
        if e.is_timeout() {
            RenderError::Timeout(format!("{}: {}", url, e))
        } else {
            RenderError::Network(format!("{}: {}", url, e))
        }
    }

    async fn capture_screenshot(&self, request: &RenderRequest, path: &Path) -> Result<()> {
        let endpoint = format!("{}/render.png", self.base_url);
        let wait = request.wait_seconds.to_string();
        let timeout = request.timeout_seconds.to_string();
        let bytes = self.client.get(&endpoint)
            .query(&[
                ("url", request.url.as_str()),
                ("wait", wait.as_str()),
                ("timeout", timeout.as_str()),
            ])
            .timeout(Duration::from_secs(request.timeout_seconds) + HARD_TIMEOUT_SLACK)
            .send()
            .await
            .context("Failed to request screenshot")?
            .error_for_status()
            .context("Renderer refused screenshot")?
            .bytes()
            .await
            .context("Failed to read screenshot")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await
                .context(format!("Failed to create directory: {}", parent.display()))?;
        }
        tokio::fs::write(path, &bytes).await
            .context(format!("Failed to write screenshot: {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl RenderClient for SplashClient {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError> {
        let endpoint = format!("{}/execute", self.base_url);
        let args = ExecuteArgs {
            url: &request.url,
            lua_source: &request.script,
            wait: request.wait_seconds,
            timeout: request.timeout_seconds,
            images: u8::from(request.load_images),
            resource_timeout: request.resource_timeout_seconds,
            user_agent: &self.user_agent,
        };

        debug!("Sending render request: {}", request.url);

        let response = self.client.post(&endpoint)
            .json(&args)
            .timeout(Duration::from_secs(request.timeout_seconds) + HARD_TIMEOUT_SLACK)
            .send()
            .await
            .map_err(|e| Self::map_transport_error(&request.url, e))?;

        let status = response.status();
        if status == StatusCode::GATEWAY_TIMEOUT {
            return Err(RenderError::Timeout(format!("{}: renderer gave up after {}s", request.url, request.timeout_seconds)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(RenderError::Network(format!("{}: renderer returned {}: {}", request.url, status, snippet)));
        }

        let output: ExecuteOutput = response.json().await
            .map_err(|e| RenderError::Network(format!("{}: invalid renderer response: {}", request.url, e)))?;

        let final_url = output.url.filter(|u| !u.is_empty()).unwrap_or_else(|| request.url.clone());
        let status_code = output.status.unwrap_or(200);
        if status_code >= 400 {
            return Err(RenderError::HttpStatus { status: status_code, url: final_url });
        }

        if let Some(content_type) = output.content_type.as_deref().filter(|ct| !ct.is_empty()) {
            if !content_type.to_ascii_lowercase().starts_with("text/html") {
                return Err(RenderError::NonHtmlContent(format!("{} is {}", final_url, content_type)));
            }
        }
        if output.html.trim().is_empty() {
            return Err(RenderError::NonHtmlContent(format!("{} returned an empty body", final_url)));
        }

        // Screenshots are best effort and never fail the render
        let mut screenshot = None;
        if let Some(path) = &request.screenshot {
            match self.capture_screenshot(request, path).await {
                Ok(()) => screenshot = Some(path.clone()),
                Err(e) => warn!("Screenshot failed for {}: {:#}", request.url, e),
            }
        }

        debug!("Successfully rendered URL: {}", final_url);

        Ok(RenderedPage {
            html: output.html,
            final_url,
            status_code,
            screenshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SplashClient {
        let settings = RenderSettings {
            splash_url: server.uri(),
            ..RenderSettings::default()
        };
        SplashClient::new(&settings).unwrap()
    }

    fn request(url: &str) -> RenderRequest {
        let mut request = RenderRequest::new(url, Arc::from("function main(splash, args) end"), &RenderSettings::default());
        request.timeout_seconds = 1;
        request
    }

    #[tokio::test]
    async fn test_render_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .and(body_partial_json(json!({"url": "https://example.com/v/1", "images": 0, "resource_timeout": 15})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "html": "<html><body>ok</body></html>",
                "url": "https://example.com/v/1?ref=x",
                "status": 200,
                "content_type": "text/html; charset=utf-8"
            })))
            .mount(&server)
            .await;

        let page = client_for(&server).render(&request("https://example.com/v/1")).await.unwrap();
        assert_eq!(page.final_url, "https://example.com/v/1?ref=x");
        assert_eq!(page.status_code, 200);
        assert!(page.html.contains("ok"));
        assert!(page.screenshot.is_none());
    }

    #[tokio::test]
    async fn test_non_html_and_empty_bodies_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"url": "https://example.com/file.pdf"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "html": "<html></html>", "status": 200, "content_type": "application/pdf"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"url": "https://example.com/empty"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "html": "   ", "status": 200, "content_type": "text/html"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let pdf = client.render(&request("https://example.com/file.pdf")).await.unwrap_err();
        assert_eq!(pdf.kind(), FailureKind::NonHtml);
        let empty = client.render(&request("https://example.com/empty")).await.unwrap_err();
        assert_eq!(empty.kind(), FailureKind::NonHtml);
    }

    #[tokio::test]
    async fn test_status_and_renderer_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"url": "https://example.com/missing"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "html": "", "status": 404, "content_type": ""
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"url": "https://example.com/slow"})))
            .respond_with(ResponseTemplate::new(504))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"url": "https://example.com/broken"})))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"error\": 400}"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(
            client.render(&request("https://example.com/missing")).await.unwrap_err(),
            RenderError::HttpStatus { status: 404, url: "https://example.com/missing".to_string() }
        );
        assert_eq!(client.render(&request("https://example.com/slow")).await.unwrap_err().kind(), FailureKind::Timeout);
        assert_eq!(client.render(&request("https://example.com/broken")).await.unwrap_err().kind(), FailureKind::Network);
    }

    #[tokio::test]
    async fn test_screenshot_is_written() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "html": "<html><body>ok</body></html>", "status": 200, "content_type": "text/html"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/render.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("shots").join("shot.png");
        let mut req = request("https://example.com/v/1");
        req.screenshot = Some(target.clone());

        let page = client_for(&server).render(&req).await.unwrap();
        assert_eq!(page.screenshot.as_ref(), Some(&target));
        assert_eq!(std::fs::read(&target).unwrap(), vec![0x89, b'P', b'N', b'G']);
    }
}
