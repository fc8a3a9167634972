//! The crawl control loop
//!
//! One owner holds the frontier, the graph and the pagination ledger. Renders are the
//! only concurrent work: each runs in a `JoinSet` and hands its page back to the loop,
//! which classifies, extracts and schedules follow-ups before touching anything else.

use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::browser::{RenderClient, RenderError, RenderRequest, RenderedPage};
use crate::cli::config::{RenderSettings, SpiderConfig};
use crate::crawler::frontier::Frontier;
use crate::crawler::pagination::PaginationLedger;
use crate::crawler::politeness::HostPoliteness;
use crate::crawler::CrawlTask;
use crate::crawler::visited::{entity_id, normalize_url, VisitedSet};
use crate::extract::selectors::CompiledSelectors;
use crate::extract::{classify, extract, ExtractContext, Limits, ParsedPage};
use crate::storage::graph::Detail;
use crate::storage::{Checkpointer, EntityGraph, EntityKind, GraphSnapshot};
use crate::utils::{CrawlReport, CrawlStats, FailureKind, StopReason};

type RenderOutcome = (CrawlTask, Result<RenderedPage, RenderError>);

/// What woke the control loop up
enum Event {
    Completed(Result<RenderOutcome, JoinError>),
    HostReady,
    Stop(StopReason),
    StopChannelClosed,
}

pub struct Scheduler {
    client: Arc<dyn RenderClient>,
    script: Arc<str>,
    render: RenderSettings,
    selectors: CompiledSelectors,
    /// Directory for page screenshots, when capture is enabled
    screenshots_dir: Option<PathBuf>,
    start_url: Url,
    run_id: Uuid,

    concurrency: usize,
    checkpoint_interval: usize,
    shutdown_grace: Duration,
    limits: Limits,

    frontier: Frontier,
    politeness: HostPoliteness,
    ledger: PaginationLedger,
    graph: EntityGraph,
    /// Final URLs of pages already classified and extracted
    processed: VisitedSet,
    stats: CrawlStats,
    checkpointer: Checkpointer,
    /// Last multiple of the checkpoint interval a checkpoint was taken at
    checkpoint_bucket: usize,
}

impl Scheduler {
    pub fn new(
        config: &SpiderConfig,
        start_url: Url,
        selectors: CompiledSelectors,
        script: Arc<str>,
        client: Arc<dyn RenderClient>,
    ) -> Result<Self> {
        let crawler = &config.crawler;
        Ok(Self {
            client,
            script,
            render: config.render.clone(),
            selectors,
            screenshots_dir: config
                .render
                .capture_screenshots
                .then(|| config.output.screenshots_dir.clone()),
            start_url,
            run_id: Uuid::new_v4(),
            concurrency: crawler.concurrency.max(1),
            checkpoint_interval: crawler.checkpoint_interval.max(1),
            shutdown_grace: Duration::from_secs(crawler.shutdown_grace),
            limits: Limits {
                max_depth: crawler.max_depth,
                max_videos: crawler.max_videos,
                skip_categories: crawler.skip_categories,
            },
            frontier: Frontier::new(crawler)?,
            politeness: HostPoliteness::new(Duration::from_millis(crawler.politeness_delay)),
            ledger: PaginationLedger::new(crawler.max_pages_per_group),
            graph: EntityGraph::new(),
            processed: VisitedSet::new(),
            stats: CrawlStats::default(),
            checkpointer: Checkpointer::new(&config.output),
            checkpoint_bucket: 0,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Crawl from the start URL until the frontier is exhausted, the video budget is
    /// reached or `stop` carries a reason. Always ends with a final export.
    pub async fn run(mut self, mut stop: watch::Receiver<Option<StopReason>>) -> CrawlReport {
        let started = Instant::now();
        let started_at = Utc::now();
        info!("Starting crawl {} from {}", self.run_id, self.start_url);

        if !self.frontier.enqueue(CrawlTask::seed(self.start_url.as_str())) {
            warn!("Start URL {} is rejected by the crawl filters", self.start_url);
        }

        let mut in_flight: JoinSet<RenderOutcome> = JoinSet::new();
        let stop_reason = self.crawl(&mut in_flight, &mut stop).await;
        info!("Stopping crawl: {} ({} tasks pending)", stop_reason, self.frontier.pending_len());

        self.drain(&mut in_flight, stop_reason, &mut stop).await;

        let discarded = self.frontier.clear();
        if discarded > 0 {
            info!("Discarded {} pending tasks", discarded);
        }
        self.stats.discarded += discarded;

        info!(
            "Visited {} URLs from {} tasks: {} dispatched, peak {} in flight, {} failed, {} paginated groups",
            self.frontier.visited_count(),
            self.frontier.enqueued_total(),
            self.stats.dispatched,
            self.stats.peak_in_flight,
            self.stats.failure_count(),
            self.ledger.groups()
        );

        let exports = self.checkpointer.finish(self.snapshot()).await;
        self.report(stop_reason, started_at, started.elapsed(), exports)
    }

    /// Dispatch and complete tasks until something stops the crawl
    async fn crawl(
        &mut self,
        in_flight: &mut JoinSet<RenderOutcome>,
        stop: &mut watch::Receiver<Option<StopReason>>,
    ) -> StopReason {
        if let Some(reason) = *stop.borrow() {
            return reason;
        }
        let mut stop_open = true;

        loop {
            if self.budget_reached() {
                return StopReason::VideoBudgetReached;
            }
            self.dispatch_ready(in_flight);
            if in_flight.is_empty() && self.frontier.is_empty() {
                return StopReason::FrontierExhausted;
            }

            // Only wake for a politeness delay when there is room to dispatch
            let wake_at = if in_flight.len() < self.concurrency {
                self.frontier.next_ready_at(&self.politeness)
            } else {
                None
            };

            let event = tokio::select! {
                joined = in_flight.join_next(), if !in_flight.is_empty() => match joined {
                    Some(joined) => Event::Completed(joined),
                    None => Event::HostReady,
                },
                _ = sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => Event::HostReady,
                changed = stop.changed(), if stop_open => match changed {
                    Ok(()) => match *stop.borrow() {
                        Some(reason) => Event::Stop(reason),
                        None => Event::HostReady,
                    },
                    Err(_) => Event::StopChannelClosed,
                },
            };

            match event {
                Event::Completed(joined) => self.complete(joined).await,
                Event::HostReady => {}
                Event::Stop(reason) => return reason,
                Event::StopChannelClosed => {
                    debug!("Stop channel closed, crawl continues until done");
                    stop_open = false;
                }
            }
        }
    }

    fn budget_reached(&self) -> bool {
        self.graph.scraped_videos() >= self.limits.max_videos
    }

    /// Start renders for every ready task while there is capacity
    fn dispatch_ready(&mut self, in_flight: &mut JoinSet<RenderOutcome>) {
        let now = Instant::now();
        while in_flight.len() < self.concurrency {
            let Some(task) = self.frontier.pop_ready(&self.politeness, now) else {
                break;
            };
            if task.depth > self.limits.max_depth {
                debug!("Dropping {} beyond max depth", task.url);
                continue;
            }

            self.politeness.record_dispatch(&HostPoliteness::host_of(&task.url), now);
            let request = self.request_for(&task);
            let client = Arc::clone(&self.client);
            debug!("Dispatching {} at depth {}", task.url, task.depth);
            in_flight.spawn(async move {
                let result = client.render(&request).await;
                (task, result)
            });
            self.stats.record_dispatch(in_flight.len());
        }
    }

    fn request_for(&self, task: &CrawlTask) -> RenderRequest {
        let mut request = RenderRequest::new(&task.url, Arc::clone(&self.script), &self.render);
        if let Some(dir) = &self.screenshots_dir {
            let name = format!(
                "screenshot_{}_{}.png",
                Utc::now().format("%Y%m%d_%H%M%S"),
                file_safe(&entity_id(&task.url))
            );
            request.screenshot = Some(dir.join(name));
        }
        request
    }

    /// Wait for in-flight renders
    ///
    /// After a budget stop or exhaustion they run to completion unless a stop arrives
    /// meanwhile. After a stop they get the shutdown grace period and are then aborted.
    async fn drain(
        &mut self,
        in_flight: &mut JoinSet<RenderOutcome>,
        reason: StopReason,
        stop: &mut watch::Receiver<Option<StopReason>>,
    ) {
        if in_flight.is_empty() {
            return;
        }
        info!("Waiting for {} in-flight renders", in_flight.len());

        if matches!(reason, StopReason::FrontierExhausted | StopReason::VideoBudgetReached) {
            loop {
                let joined = tokio::select! {
                    joined = in_flight.join_next() => joined,
                    requested = stop_requested(stop) => {
                        info!("{} requested while draining", requested);
                        break;
                    }
                };
                match joined {
                    Some(joined) => self.complete(joined).await,
                    None => return,
                }
            }
        }

        let grace = self.shutdown_grace;
        let drained = async {
            while let Some(joined) = in_flight.join_next().await {
                self.complete(joined).await;
            }
        };
        if tokio::time::timeout(grace, drained).await.is_err() {
            warn!("Aborting {} renders after {:?} grace period", in_flight.len(), grace);
            for _ in 0..in_flight.len() {
                self.stats.record_failure(FailureKind::Aborted);
            }
            in_flight.shutdown().await;
        }
    }

    /// Fold one finished render back into the crawl
    async fn complete(&mut self, joined: Result<RenderOutcome, JoinError>) {
        match joined {
            Ok((task, Ok(page))) => self.process_page(&task, page),
            Ok((task, Err(e))) => {
                warn!("Failed to render {} ({}): {}", task.url, e.kind(), e);
                self.stats.record_failure(e.kind());
            }
            Err(e) => {
                error!("Render task ended abnormally: {}", e);
                let kind = if e.is_cancelled() { FailureKind::Aborted } else { FailureKind::Network };
                self.stats.record_failure(kind);
            }
        }

        let bucket = self.graph.scraped_videos() / self.checkpoint_interval;
        if bucket > self.checkpoint_bucket {
            self.checkpoint_bucket = bucket;
            let snapshot = self.snapshot();
            self.checkpointer.snapshot(snapshot).await;
        }
    }

    /// Classify and extract a rendered page. Runs to completion without suspending.
    fn process_page(&mut self, task: &CrawlTask, page: RenderedPage) {
        let url = match Url::parse(&page.final_url).or_else(|_| Url::parse(&task.url)) {
            Ok(url) => url,
            Err(e) => {
                warn!("Rendered page has no usable URL {}: {}", page.final_url, e);
                self.stats.record_failure(FailureKind::Network);
                return;
            }
        };
        debug!("Rendered {} with status {}", url, page.status_code);
        if normalize_url(url.as_str()) != normalize_url(&task.url) {
            debug!("{} redirected to {}", task.url, url);
            if !self.frontier.mark_visited(url.as_str()) && self.frontier.remove_pending(url.as_str()) {
                debug!("Dropped pending task for redirect target {}", url);
            }
        }
        if !self.processed.insert(url.as_str()) {
            debug!("Skipping {}: {} was already processed", task.url, url);
            return;
        }

        let parsed = ParsedPage::new(url, &page.html, &self.selectors);
        let kind = task.page_hint.unwrap_or_else(|| classify(&parsed));
        self.stats.record_page(kind);

        let mut ctx = ExtractContext::new(task, &mut self.graph, &mut self.frontier, &mut self.ledger, &self.limits);
        ctx.screenshot = page.screenshot.map(|path| path.display().to_string());
        extract(kind, &parsed, &mut ctx);
        let summary = ctx.summary;

        info!(
            "Processed {} page {} (depth {}): {} new entities, {} edges, {} tasks",
            kind, parsed.url(), task.depth, summary.entities_created, summary.edges_added, summary.tasks_enqueued
        );
    }

    fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot::capture(&self.graph, self.run_id, self.start_url.as_str())
    }

    fn report(
        &self,
        stop_reason: StopReason,
        started_at: chrono::DateTime<Utc>,
        elapsed: Duration,
        exports: Vec<PathBuf>,
    ) -> CrawlReport {
        CrawlReport {
            run_id: self.run_id,
            started_at,
            stop_reason,
            entities: self.graph.node_count(),
            videos_scraped: self.graph.scraped_videos(),
            video_stubs: self.graph.count_where(EntityKind::Video, Detail::Stub),
            categories: self.graph.nodes().filter(|n| n.kind == EntityKind::Category).count(),
            edges: self.graph.edge_count(),
            pages_visited: self.stats.pages_visited,
            pages_by_kind: self.stats.pages_by_kind.clone(),
            failures_by_kind: self.stats.failures.clone(),
            checkpoints_written: self.checkpointer.written(),
            checkpoint_failures: self.checkpointer.failed(),
            exports,
            elapsed,
        }
    }
}

/// Resolve once the stop channel carries a reason. Never resolves if the sender is gone.
async fn stop_requested(stop: &mut watch::Receiver<Option<StopReason>>) -> StopReason {
    loop {
        if let Some(reason) = *stop.borrow_and_update() {
            return reason;
        }
        if stop.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
