use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::cli::config::CrawlerSettings;
use crate::crawler::politeness::HostPoliteness;
use crate::crawler::task::CrawlTask;
use crate::crawler::visited::{normalize_url, VisitedSet};

/// Pending fetch tasks plus the admission rules every new task must pass
pub struct Frontier {
    /// Maximum hops from the start URL
    max_depth: u32,

    /// Queue of tasks not yet dispatched
    pending: VecDeque<CrawlTask>,

    /// URLs already enqueued or fetched
    visited: VisitedSet,

    /// Compiled regex patterns for URL inclusion
    include_patterns: Vec<Regex>,

    /// Compiled regex patterns for URL exclusion
    exclude_patterns: Vec<Regex>,

    /// Allowed domains for crawling (if empty, any domain is allowed)
    allowed_domains: HashSet<String>,

    /// Tasks accepted since the crawl started
    enqueued_total: usize,
}

impl Frontier {
    /// Create a new frontier with the given crawler settings
    pub fn new(config: &CrawlerSettings) -> Result<Self> {
        let include_patterns = compile_patterns(&config.url_patterns.include)
            .context("Invalid include pattern")?;
        let exclude_patterns = compile_patterns(&config.url_patterns.exclude)
            .context("Invalid exclude pattern")?;

        let allowed_domains = config.allowed_domains.iter()
            .map(|domain| domain.to_lowercase())
            .collect();

        Ok(Self {
            max_depth: config.max_depth,
            pending: VecDeque::new(),
            visited: VisitedSet::new(),
            include_patterns,
            exclude_patterns,
            allowed_domains,
            enqueued_total: 0,
        })
    }

    /// Determine if a URL passes the domain and pattern filters
    pub fn should_crawl(&self, url: &str) -> bool {
        let normalized_url = normalize_url(url);

        let parsed_url = match Url::parse(&normalized_url) {
            Ok(url) => url,
            Err(e) => {
                debug!("Skipping invalid URL {}: {}", normalized_url, e);
                return false;
            }
        };

        if !matches!(parsed_url.scheme(), "http" | "https") {
            debug!("Skipping non-http URL: {}", normalized_url);
            return false;
        }

        // Check if the URL is in an allowed domain
        if !self.allowed_domains.is_empty() {
            let Some(host) = parsed_url.host_str() else {
                debug!("Skipping URL without host: {}", normalized_url);
                return false;
            };
            let host = host.to_lowercase();
            if !self.allowed_domains.iter().any(|domain| host == *domain || host.ends_with(&format!(".{}", domain))) {
                debug!("Skipping URL from non-allowed domain: {}", host);
                return false;
            }
        }

        if self.exclude_patterns.iter().any(|p| p.is_match(&normalized_url)) {
            debug!("Skipping URL matching exclusion pattern: {}", normalized_url);
            return false;
        }

        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|p| p.is_match(&normalized_url))
        {
            debug!("Skipping URL not matching any inclusion pattern: {}", normalized_url);
            return false;
        }

        true
    }

    /// Admit a task into the pending queue
    ///
    /// The visited check happens here, so the same URL discovered twice only ever
    /// produces one task. Returns false if the task was rejected.
    pub fn enqueue(&mut self, task: CrawlTask) -> bool {
        if task.depth > self.max_depth {
            debug!("Skipping {} beyond max depth {}", task.url, self.max_depth);
            return false;
        }

        if !self.should_crawl(&task.url) {
            return false;
        }

        if !self.visited.insert(&task.url) {
            debug!("Skipping already seen URL: {}", task.url);
            return false;
        }

        self.enqueued_total += 1;
        self.pending.push_back(task);
        true
    }

    /// Whether a URL has already been enqueued or fetched
    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }

    /// Record a URL reached by redirect so it is not enqueued later.
    /// Returns false if the URL was already known.
    pub fn mark_visited(&mut self, url: &str) -> bool {
        self.visited.insert(url)
    }

    /// Drop the pending task for `url`, if one is still waiting
    pub fn remove_pending(&mut self, url: &str) -> bool {
        let normalized = normalize_url(url);
        let Some(position) = self.pending.iter().position(|task| normalize_url(&task.url) == normalized) else {
            return false;
        };
        self.pending.remove(position);
        true
    }

    /// Pop the oldest task whose host is ready according to `politeness`
    pub fn pop_ready(&mut self, politeness: &HostPoliteness, now: Instant) -> Option<CrawlTask> {
        let position = self.pending.iter()
            .position(|task| politeness.is_ready(&HostPoliteness::host_of(&task.url), now))?;
        self.pending.remove(position)
    }

    /// Earliest instant at which some pending task becomes dispatchable
    pub fn next_ready_at(&self, politeness: &HostPoliteness) -> Option<Instant> {
        let now = Instant::now();
        self.pending.iter()
            .map(|task| politeness.ready_at(&HostPoliteness::host_of(&task.url)).unwrap_or(now))
            .min()
    }

    /// Drop every pending task. Returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &CrawlTask> {
        self.pending.iter()
    }

    pub fn enqueued_total(&self) -> usize {
        self.enqueued_total
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter()
        .map(|pattern| Regex::new(pattern).with_context(|| format!("'{}'", pattern)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::{CrawlerSettings, UrlPatterns};
    use std::time::Duration;

    fn create_test_config() -> CrawlerSettings {
        CrawlerSettings {
            max_depth: 2,
            allowed_domains: vec!["example.com".to_string()],
            url_patterns: UrlPatterns {
                include: vec![r"^https?://([a-z]+\.)?example\.com/.*$".to_string()],
                exclude: vec![r"^.*\.(jpg|jpeg|png|gif|css|js)$".to_string()],
            },
            ..CrawlerSettings::default()
        }
    }

    #[test]
    fn test_should_crawl() {
        let frontier = Frontier::new(&create_test_config()).unwrap();

        assert!(frontier.should_crawl("https://example.com/page1"));
        assert!(frontier.should_crawl("https://www.example.com/page1"));
        assert!(!frontier.should_crawl("https://other-site.com/page"));
        assert!(!frontier.should_crawl("https://example.com/image.jpg"));
        assert!(!frontier.should_crawl("ftp://example.com/file"));
        assert!(!frontier.should_crawl("not a url"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let mut config = create_test_config();
        config.url_patterns.include.push("([unclosed".to_string());
        assert!(Frontier::new(&config).is_err());
    }

    #[test]
    fn test_enqueue_is_exactly_once() {
        let mut frontier = Frontier::new(&create_test_config()).unwrap();
        let seed = CrawlTask::seed("https://example.com/start");

        assert!(frontier.enqueue(seed.child("https://example.com/v/1", None)));
        // Same URL discovered from another parent, with a fragment
        let other_parent = seed.child("https://example.com/list", None);
        assert!(!frontier.enqueue(other_parent.child("https://example.com/v/1#related", None)));

        assert_eq!(frontier.pending_len(), 1);
        assert_eq!(frontier.enqueued_total(), 1);
    }

    #[test]
    fn test_enqueue_rejects_beyond_max_depth() {
        let mut frontier = Frontier::new(&create_test_config()).unwrap();
        let mut task = CrawlTask::seed("https://example.com/deep");
        task.depth = 3;
        assert!(!frontier.enqueue(task));
        // A rejected task leaves the URL available
        assert!(!frontier.is_visited("https://example.com/deep"));
    }

    #[test]
    fn test_redirect_target_leaves_the_queue() {
        let mut frontier = Frontier::new(&create_test_config()).unwrap();
        let seed = CrawlTask::seed("https://example.com/videos");
        frontier.enqueue(seed.child("https://example.com/video/old", None));
        frontier.enqueue(seed.child("https://example.com/video/new", None));

        assert!(!frontier.mark_visited("https://example.com/video/new"));
        assert!(frontier.remove_pending("https://example.com/video/new#player"));
        assert!(!frontier.remove_pending("https://example.com/video/new"));
        assert_eq!(frontier.pending().map(|t| t.url.as_str()).collect::<Vec<_>>(), ["https://example.com/video/old"]);

        assert!(frontier.mark_visited("https://example.com/video/elsewhere"));
        assert!(!frontier.enqueue(seed.child("https://example.com/video/elsewhere", None)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_ready_skips_hosts_in_cooldown() {
        let mut config = create_test_config();
        config.allowed_domains.clear();
        config.url_patterns.include.clear();
        let mut frontier = Frontier::new(&config).unwrap();
        let mut politeness = HostPoliteness::new(Duration::from_secs(1));

        frontier.enqueue(CrawlTask::seed("https://a.com/1"));
        frontier.enqueue(CrawlTask::seed("https://a.com/2"));
        frontier.enqueue(CrawlTask::seed("https://b.com/1"));

        let now = Instant::now();
        let first = frontier.pop_ready(&politeness, now).unwrap();
        assert_eq!(first.url, "https://a.com/1");
        politeness.record_dispatch("a.com", now);

        let second = frontier.pop_ready(&politeness, now).unwrap();
        assert_eq!(second.url, "https://b.com/1");
        politeness.record_dispatch("b.com", now);

        assert!(frontier.pop_ready(&politeness, now).is_none());
        assert_eq!(frontier.next_ready_at(&politeness), Some(now + Duration::from_secs(1)));
    }
}
