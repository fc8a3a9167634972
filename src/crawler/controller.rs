use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::browser::script::load_script;
use crate::browser::{RenderClient, RetryingClient, SplashClient};
use crate::cli::config::SpiderConfig;
use crate::crawler::Scheduler;
use crate::extract::selectors::CompiledSelectors;
use crate::utils::{CrawlReport, StopReason};

/// Wires configuration, renderer and stop signals around one crawl run
pub struct CrawlerController {
    config: SpiderConfig,
}

impl CrawlerController {
    pub fn new(config: SpiderConfig) -> Self {
        Self { config }
    }

    /// Validate the configuration, connect to the renderer and crawl `start_url`
    pub async fn run(&self, start_url: &str) -> Result<CrawlReport> {
        let (url, selectors) = self.config.validate(start_url)?;
        let script = load_script(self.config.render.script_path.as_deref())?;

        let splash = SplashClient::new(&self.config.render)?;
        info!("Rendering through {}", self.config.render.splash_url);
        let client = Arc::new(RetryingClient::new(splash, &self.config.render.retry));

        self.run_with_client(url, selectors, Arc::from(script), client).await
    }

    /// Crawl with an already built render client
    pub async fn run_with_client(
        &self,
        url: Url,
        selectors: CompiledSelectors,
        script: Arc<str>,
        client: Arc<dyn RenderClient>,
    ) -> Result<CrawlReport> {
        self.prepare_directories().await?;

        let scheduler = Scheduler::new(&self.config, url, selectors, script, client)?;
        info!("Crawl run ID: {}", scheduler.run_id());

        let (stop_tx, stop_rx) = watch::channel(None);
        let timeout = self.config.crawler.crawl_timeout.map(Duration::from_secs);
        let triggers = spawn_stop_triggers(stop_tx, timeout);

        let report = scheduler.run(stop_rx).await;
        triggers.abort();
        Ok(report)
    }

    async fn prepare_directories(&self) -> Result<()> {
        let output = &self.config.output;
        tokio::fs::create_dir_all(&output.output_dir).await
            .context(format!("Failed to create output directory: {}", output.output_dir.display()))?;
        if self.config.render.capture_screenshots {
            tokio::fs::create_dir_all(&output.screenshots_dir).await
                .context(format!("Failed to create screenshots directory: {}", output.screenshots_dir.display()))?;
        }
        Ok(())
    }
}

/// Send a stop reason on Ctrl+C or once `timeout` has elapsed, whichever comes first
fn spawn_stop_triggers(stop_tx: watch::Sender<Option<StopReason>>, timeout: Option<Duration>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interrupted = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl+C: {}", e);
                futures::future::pending::<()>().await;
            }
        };
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => futures::future::pending::<()>().await,
            }
        };

        let reason = tokio::select! {
            _ = interrupted => StopReason::Shutdown,
            _ = deadline => StopReason::Timeout,
        };
        info!("Stop requested: {}", reason);
        let _ = stop_tx.send(Some(reason));

        // Keep the channel open so the loop sees the reason, not a closed sender
        stop_tx.closed().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::remote::{RenderError, RenderRequest, RenderedPage};
    use crate::cli::config::{CrawlerSettings, OutputSettings, RenderSettings};
    use crate::extract::selectors::SelectorTable;
    use crate::utils::metrics::FailureKind;
    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    /// Serves the start page at once and hangs on everything else
    struct HangingSite;

    #[async_trait]
    impl RenderClient for HangingSite {
        async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError> {
            if request.url != "https://example.com/videos" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(RenderedPage {
                html: r#"<div class="videos-grid"><div class="video-item"><a href="/video/a">A</a></div></div>"#.to_string(),
                final_url: request.url.clone(),
                status_code: 200,
                screenshot: None,
            })
        }
    }

    fn config(dir: &std::path::Path) -> SpiderConfig {
        SpiderConfig {
            crawler: CrawlerSettings {
                politeness_delay: 0,
                crawl_timeout: Some(30),
                shutdown_grace: 2,
                ..CrawlerSettings::default()
            },
            output: OutputSettings {
                output_dir: dir.join("out"),
                screenshots_dir: dir.join("shots"),
                ..OutputSettings::default()
            },
            render: RenderSettings {
                capture_screenshots: true,
                ..RenderSettings::default()
            },
            ..SpiderConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_timeout_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let controller = CrawlerController::new(config(dir.path()));
        let selectors = CompiledSelectors::compile(&SelectorTable::builtin()).unwrap();

        let report = assert_ok!(
            controller
                .run_with_client(
                    Url::parse("https://example.com/videos").unwrap(),
                    selectors,
                    Arc::from(""),
                    Arc::new(HangingSite),
                )
                .await
        );

        assert_eq!(report.stop_reason, StopReason::Timeout);
        assert_eq!(report.failures_by_kind[&FailureKind::Aborted], 1);
        assert_eq!(report.video_stubs, 1);
        assert!(dir.path().join("shots").is_dir());
        assert!(dir.path().join("out").join("video_relationships.json").is_file());
    }

    #[tokio::test]
    async fn test_invalid_start_url_is_rejected_before_crawling() {
        let dir = tempfile::tempdir().unwrap();
        let controller = CrawlerController::new(config(dir.path()));
        assert_err!(controller.run("ftp://example.com/").await);
        assert!(!dir.path().join("out").exists());
    }
}
