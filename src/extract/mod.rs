//! Page classification and per-kind extraction
//!
//! Extractors run synchronously on the control loop. They write entities and
//! relations into the graph and admit follow-up tasks through the frontier; every
//! admission goes through [`ExtractContext`], which applies the depth, budget,
//! visited and pagination rules in one place.

pub mod category;
pub mod classifier;
pub mod listing;
pub mod page;
pub mod selectors;
pub mod video;

use tracing::{debug, warn};

use crate::crawler::frontier::Frontier;
use crate::crawler::pagination::PaginationLedger;
use crate::crawler::{CrawlTask, PageKind};
use crate::crawler::visited::group_key;
use crate::storage::graph::Upsert;
use crate::storage::{Entity, EntityGraph, RelationKind};

pub use classifier::classify;
pub use page::ParsedPage;

/// Crawl limits extractors must respect
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_depth: u32,
    pub max_videos: usize,
    pub skip_categories: bool,
}

/// What one extraction did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub entities_created: usize,
    pub entities_merged: usize,
    pub videos_scraped: usize,
    pub edges_added: usize,
    pub tasks_enqueued: usize,
    pub next_pages: usize,
}

/// Mutable crawl state handed to an extractor for one page
pub struct ExtractContext<'a> {
    pub task: &'a CrawlTask,
    pub graph: &'a mut EntityGraph,
    pub frontier: &'a mut Frontier,
    pub ledger: &'a mut PaginationLedger,
    pub limits: &'a Limits,
    /// Screenshot captured for this page, if any
    pub screenshot: Option<String>,
    pub summary: ExtractSummary,
}

impl<'a> ExtractContext<'a> {
    pub fn new(
        task: &'a CrawlTask,
        graph: &'a mut EntityGraph,
        frontier: &'a mut Frontier,
        ledger: &'a mut PaginationLedger,
        limits: &'a Limits,
    ) -> Self {
        Self {
            task,
            graph,
            frontier,
            ledger,
            limits,
            screenshot: None,
            summary: ExtractSummary::default(),
        }
    }

    /// Depth of anything discovered on this page
    pub fn child_depth(&self) -> u32 {
        self.task.depth + 1
    }

    /// Whether links on this page are still within the depth limit
    pub fn can_descend(&self) -> bool {
        self.child_depth() <= self.limits.max_depth
    }

    pub fn video_budget_left(&self) -> bool {
        self.graph.scraped_videos() < self.limits.max_videos
    }

    pub fn record(&mut self, entity: Entity) -> Upsert {
        let outcome = self.graph.upsert(entity);
        match outcome {
            Upsert::Created => self.summary.entities_created += 1,
            Upsert::Merged => self.summary.entities_merged += 1,
            Upsert::Promoted => self.summary.entities_merged += 1,
        }
        outcome
    }

    pub fn relate(&mut self, from: &str, to: &str, kind: RelationKind) {
        if self.graph.add_relation(from, to, kind) {
            self.summary.edges_added += 1;
        }
    }

    /// Enqueue a link one hop down, if depth, budget and dedup rules allow
    pub fn follow(&mut self, url: &str, parent_id: Option<String>) -> bool {
        if !self.can_descend() {
            return false;
        }
        if !self.video_budget_left() {
            debug!("Video budget exhausted, not following {}", url);
            return false;
        }
        let enqueued = self.frontier.enqueue(self.task.child(url, parent_id));
        if enqueued {
            self.summary.tasks_enqueued += 1;
        }
        enqueued
    }

    /// Follow the page's "next page" link at the same depth, bounded by the ledger
    pub fn follow_next_page(&mut self, page: &ParsedPage<'_>, kind: PageKind) -> bool {
        let Some(next_url) = page.value(selectors::fields::NEXT_PAGE).and_then(|href| page.resolve(&href)) else {
            return false;
        };
        if !self.video_budget_left() {
            debug!("Video budget exhausted, not following next page {}", next_url);
            return false;
        }
        if self.frontier.is_visited(&next_url) || !self.frontier.should_crawl(&next_url) {
            debug!("Next page already seen or filtered: {}", next_url);
            return false;
        }

        // Pages reached through "next" stay in the group of the first page
        let group = self.task.group.clone().unwrap_or_else(|| group_key(page.url().as_str()));
        if self.ledger.try_follow(&group).is_none() {
            return false;
        }

        let enqueued = self.frontier.enqueue(self.task.next_page(next_url, kind, group));
        if enqueued {
            self.summary.tasks_enqueued += 1;
            self.summary.next_pages += 1;
        }
        enqueued
    }
}

/// Run the extractor matching `kind`
pub fn extract(kind: PageKind, page: &ParsedPage<'_>, ctx: &mut ExtractContext<'_>) {
    match kind {
        PageKind::Video => video::extract(page, ctx),
        PageKind::Category => category::extract(page, ctx),
        PageKind::Listing => listing::extract(page, ctx),
        PageKind::Unknown => warn!("Unknown page type for URL: {}", page.url()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::cli::config::CrawlerSettings;
    use crate::extract::selectors::{CompiledSelectors, SelectorTable};

    /// Crawl state for driving extractors directly
    pub struct Harness {
        pub graph: EntityGraph,
        pub frontier: Frontier,
        pub ledger: PaginationLedger,
        pub limits: Limits,
        pub selectors: CompiledSelectors,
    }

    impl Harness {
        pub fn new(max_depth: u32, max_videos: usize, max_pages: u32) -> Self {
            let settings = CrawlerSettings {
                max_depth,
                ..CrawlerSettings::default()
            };
            Self {
                graph: EntityGraph::new(),
                frontier: Frontier::new(&settings).unwrap(),
                ledger: PaginationLedger::new(max_pages),
                limits: Limits {
                    max_depth,
                    max_videos,
                    skip_categories: false,
                },
                selectors: CompiledSelectors::compile(&SelectorTable::builtin()).unwrap(),
            }
        }

        /// Classify and extract `html` as if `task` had just rendered it
        pub fn run(&mut self, task: &CrawlTask, html: &str) -> (PageKind, ExtractSummary) {
            let url = url::Url::parse(&task.url).unwrap();
            let page = ParsedPage::new(url, html, &self.selectors);
            let kind = task.page_hint.unwrap_or_else(|| classify(&page));
            let mut ctx = ExtractContext::new(task, &mut self.graph, &mut self.frontier, &mut self.ledger, &self.limits);
            extract(kind, &page, &mut ctx);
            (kind, ctx.summary)
        }
    }
}
