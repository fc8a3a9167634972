use tracing::{debug, info};

use crate::crawler::task::PageKind;
use crate::crawler::visited::entity_id;
use crate::extract::page::ParsedPage;
use crate::extract::selectors::fields;
use crate::extract::ExtractContext;
use crate::storage::graph::{Detail, Entity, EntityKind};

/// Record every category on the page and follow into them
///
/// With `skip_categories` the categories are still recorded, but nothing is
/// enqueued, including the next page of the grid.
pub fn extract(page: &ParsedPage<'_>, ctx: &mut ExtractContext<'_>) {
    let within_depth = ctx.can_descend();
    let child_depth = ctx.child_depth();
    let mut found = 0;

    for item in page.select(fields::CATEGORY_ITEM) {
        let Some(category_url) = page.link_in(item, fields::CATEGORY_URL) else {
            continue;
        };
        let title = page.value_in(item, fields::CATEGORY_TITLE);
        info!(
            "Found category: {} ({})",
            title.as_deref().unwrap_or("untitled"),
            category_url
        );
        found += 1;

        if !within_depth {
            continue;
        }
        let category_id = entity_id(&category_url);
        ctx.record(
            Entity::new(&category_id, &category_url, EntityKind::Category, child_depth, Detail::Stub).with_title(title),
        );

        if !ctx.limits.skip_categories {
            ctx.follow(&category_url, Some(category_id));
        }
    }

    if ctx.limits.skip_categories {
        debug!("Skipping {} categories on {}", found, page.url());
        return;
    }
    ctx.follow_next_page(page, PageKind::Category);
}

#[cfg(test)]
mod tests {
    use crate::crawler::task::{CrawlTask, PageKind};
    use crate::extract::testing::Harness;
    use crate::storage::graph::EntityKind;

    const CATEGORIES: &str = r#"
        <html><body>
          <div class="categories">
            <div class="category-item"><a href="/c/cats"><span class="title">Cats</span></a></div>
            <div class="category-item"><a href="/c/dogs"><span class="title">Dogs</span></a></div>
          </div>
          <a class="next-page" href="/categories?page=2">Next</a>
        </body></html>"#;

    #[test]
    fn test_categories_are_recorded_and_followed() {
        let mut harness = Harness::new(1, 10, 3);
        let task = CrawlTask::seed("https://example.com/categories");
        let (kind, summary) = harness.run(&task, CATEGORIES);

        assert_eq!(kind, PageKind::Category);
        let cats = harness.graph.get("cats").unwrap();
        assert_eq!(cats.kind, EntityKind::Category);
        assert_eq!(cats.title.as_deref(), Some("Cats"));
        assert_eq!(summary.tasks_enqueued, 3);
        assert_eq!(summary.next_pages, 1);

        let pending: Vec<_> = harness.frontier.pending().collect();
        assert_eq!(pending[0].url, "https://example.com/c/cats");
        assert_eq!(pending[0].parent_id.as_deref(), Some("cats"));
        assert_eq!(pending[0].depth, 1);
        let next = pending[2];
        assert_eq!(next.depth, 0);
        assert_eq!(next.page_hint, Some(PageKind::Category));
    }

    #[test]
    fn test_skip_categories_records_without_enqueueing() {
        let mut harness = Harness::new(1, 10, 3);
        harness.limits.skip_categories = true;
        let task = CrawlTask::seed("https://example.com/categories");
        let (_, summary) = harness.run(&task, CATEGORIES);

        assert_eq!(harness.graph.node_count(), 2);
        assert_eq!(summary.tasks_enqueued, 0);
        assert!(harness.frontier.is_empty());
        assert_eq!(harness.ledger.groups(), 0);
    }
}
