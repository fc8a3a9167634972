use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::crawler::task::PageKind;

/// Why a task ended in the failed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Network,
    NonHtml,
    HttpStatus,
    /// In flight when the crawl was stopped and the grace period ran out
    Aborted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network",
            FailureKind::NonHtml => "non_html",
            FailureKind::HttpStatus => "http_status",
            FailureKind::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Counters kept by the control loop during a crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlStats {
    pub dispatched: usize,
    pub pages_visited: usize,
    pub pages_by_kind: BTreeMap<PageKind, usize>,
    pub failures: BTreeMap<FailureKind, usize>,
    /// Pending tasks dropped when the crawl stopped early
    pub discarded: usize,
    /// Peak number of renders in flight
    pub peak_in_flight: usize,
}

impl CrawlStats {
    pub fn record_page(&mut self, kind: PageKind) {
        self.pages_visited += 1;
        *self.pages_by_kind.entry(kind).or_default() += 1;
    }

    pub fn record_failure(&mut self, kind: FailureKind) {
        *self.failures.entry(kind).or_default() += 1;
    }

    pub fn record_dispatch(&mut self, in_flight: usize) {
        self.dispatched += 1;
        self.peak_in_flight = self.peak_in_flight.max(in_flight);
    }

    pub fn failure_count(&self) -> usize {
        self.failures.values().sum()
    }
}

/// Why the control loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    FrontierExhausted,
    VideoBudgetReached,
    Timeout,
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StopReason::FrontierExhausted => "no pages left to visit",
            StopReason::VideoBudgetReached => "video budget reached",
            StopReason::Timeout => "crawl timeout",
            StopReason::Shutdown => "stop requested",
        };
        f.write_str(reason)
    }
}

/// Summary reported when a crawl completes
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub stop_reason: StopReason,
    pub entities: usize,
    pub videos_scraped: usize,
    pub video_stubs: usize,
    pub categories: usize,
    pub edges: usize,
    pub pages_visited: usize,
    pub pages_by_kind: BTreeMap<PageKind, usize>,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    pub checkpoints_written: usize,
    pub checkpoint_failures: usize,
    pub exports: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run ID: {}", self.run_id)?;
        writeln!(f, "Stopped: {}", self.stop_reason)?;
        writeln!(f, "Elapsed: {:.1}s", self.elapsed.as_secs_f64())?;
        writeln!(
            f,
            "Entities: {} ({} videos scraped, {} video stubs, {} categories)",
            self.entities, self.videos_scraped, self.video_stubs, self.categories
        )?;
        writeln!(f, "Edges: {}", self.edges)?;
        writeln!(f, "Pages visited: {}", self.pages_visited)?;
        for (kind, count) in &self.pages_by_kind {
            writeln!(f, "  - {}: {}", kind, count)?;
        }
        let failures: usize = self.failures_by_kind.values().sum();
        writeln!(f, "Failures: {}", failures)?;
        for (kind, count) in &self.failures_by_kind {
            writeln!(f, "  - {}: {}", kind, count)?;
        }
        writeln!(
            f,
            "Checkpoints: {} written, {} failed",
            self.checkpoints_written, self.checkpoint_failures
        )?;
        if self.exports.is_empty() {
            write!(f, "Graph export: none written")
        } else {
            write!(f, "Graph export:")?;
            for path in &self.exports {
                write!(f, "\n  - {}", path.display())?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_counters() {
        let mut stats = CrawlStats::default();
        stats.record_page(PageKind::Video);
        stats.record_page(PageKind::Video);
        stats.record_page(PageKind::Unknown);
        stats.record_failure(FailureKind::Timeout);
        stats.record_dispatch(3);
        stats.record_dispatch(1);

        assert_eq!(stats.pages_visited, 3);
        assert_eq!(stats.pages_by_kind[&PageKind::Video], 2);
        assert_eq!(stats.failure_count(), 1);
        assert_eq!(stats.peak_in_flight, 3);
    }

    #[test]
    fn test_report_display() {
        let report = CrawlReport {
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            stop_reason: StopReason::VideoBudgetReached,
            entities: 4,
            videos_scraped: 2,
            video_stubs: 1,
            categories: 1,
            edges: 3,
            pages_visited: 3,
            pages_by_kind: BTreeMap::from([(PageKind::Video, 2)]),
            failures_by_kind: BTreeMap::from([(FailureKind::NonHtml, 1)]),
            checkpoints_written: 1,
            checkpoint_failures: 0,
            exports: vec![PathBuf::from("output/video_relationships.json")],
            elapsed: Duration::from_millis(1500),
        };
        let text = report.to_string();
        assert!(text.contains("Stopped: video budget reached"));
        assert!(text.contains("  - non_html: 1"));
        assert!(text.contains("output/video_relationships.json"));
    }
}
