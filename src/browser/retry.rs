//! Bounded retries layered above a render client
//!
//! The wrapper reissues the same request itself, so a retried page never becomes a
//! second task and never goes through the visited-set check again.

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::warn;

use crate::browser::remote::{RenderClient, RenderError, RenderRequest, RenderedPage};
use crate::cli::config::RetrySettings;

/// Target statuses worth another attempt
const RETRY_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Delay before retry `attempt`: doubling from the base delay up to the cap, plus up
/// to `jitter_percent` of that delay at random
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter_percent: u8,
}

impl Backoff {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            base: Duration::from_millis(settings.base_delay_ms),
            cap: Duration::from_millis(settings.max_delay_ms.max(settings.base_delay_ms)),
            jitter_percent: settings.jitter_percent.min(100),
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base.saturating_mul(1u32 << attempt.min(16)).min(self.cap);
        if self.jitter_percent == 0 {
            return delay;
        }
        let spread = delay.as_millis() as u64 * u64::from(self.jitter_percent) / 100;
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

/// Whether a failure is transient
pub fn is_retryable(error: &RenderError) -> bool {
    match error {
        RenderError::Timeout(_) | RenderError::Network(_) => true,
        RenderError::HttpStatus { status, .. } => RETRY_STATUSES.contains(status),
        RenderError::NonHtmlContent(_) => false,
    }
}

pub struct RetryingClient<C> {
    inner: C,
    max_retries: u32,
    backoff: Backoff,
}

impl<C: RenderClient> RetryingClient<C> {
    pub fn new(inner: C, settings: &RetrySettings) -> Self {
        Self {
            inner,
            max_retries: settings.max_retries,
            backoff: Backoff::from_settings(settings),
        }
    }
}

#[async_trait]
impl<C: RenderClient> RenderClient for RetryingClient<C> {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError> {
        let mut attempt = 0;
        loop {
            match self.inner.render(request).await {
                Ok(page) => return Ok(page),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    let delay = self.backoff.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        "Retrying {} ({}/{}) in {:?} after: {}",
                        request.url, attempt, self.max_retries, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
