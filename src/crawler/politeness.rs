//! Per-host dispatch spacing

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Tracks when each host may receive its next dispatch
#[derive(Debug)]
pub struct HostPoliteness {
    delay: Duration,
    ready_at: HashMap<String, Instant>,
}

impl HostPoliteness {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ready_at: HashMap::new(),
        }
    }

    /// Host key used for spacing. URLs without a host share one bucket.
    pub fn host_of(url: &str) -> String {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_default()
    }

    /// Earliest instant at which `host` may be dispatched to
    pub fn ready_at(&self, host: &str) -> Option<Instant> {
        self.ready_at.get(host).copied()
    }

    pub fn is_ready(&self, host: &str, now: Instant) -> bool {
        self.ready_at(host).map_or(true, |at| at <= now)
    }

    /// Record a dispatch to `host` at `now`
    pub fn record_dispatch(&mut self, host: &str, now: Instant) {
        self.ready_at.insert(host.to_string(), now + self.delay);
    }
}
