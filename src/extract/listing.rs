use tracing::debug;

use crate::crawler::task::PageKind;
use crate::crawler::visited::entity_id;
use crate::extract::page::ParsedPage;
use crate::extract::selectors::fields;
use crate::extract::ExtractContext;
use crate::storage::graph::{Detail, Entity, EntityKind, RelationKind};

/// Record each listed video as a stub, follow into it, then follow the next page
pub fn extract(page: &ParsedPage<'_>, ctx: &mut ExtractContext<'_>) {
    // Listings reached from a category page belong to that category
    let category = ctx
        .task
        .parent_id
        .clone()
        .filter(|id| ctx.graph.get(id).is_some_and(|e| e.kind == EntityKind::Category));
    let within_depth = ctx.can_descend();
    let child_depth = ctx.child_depth();

    let items = page.select(fields::VIDEO_ITEM);
    debug!("Listing {} has {} video items", page.url(), items.len());

    for item in items {
        let Some(video_url) = page.link_in(item, fields::VIDEO_URL) else {
            continue;
        };
        let id = entity_id(&video_url);

        if within_depth {
            let thumbnail = page
                .value_in(item, fields::VIDEO_THUMBNAIL)
                .map(|src| page.resolve(&src).unwrap_or(src));
            let stub = Entity::new(&id, &video_url, EntityKind::Video, child_depth, Detail::Stub)
                .with_title(page.value_in(item, fields::VIDEO_TITLE))
                .with_attribute("thumbnail", thumbnail)
                .with_attribute("duration", page.value_in(item, fields::VIDEO_DURATION))
                .with_attribute("views", page.value_in(item, fields::VIDEO_VIEWS));
            ctx.record(stub);

            if let Some(category_id) = &category {
                ctx.relate(category_id, &id, RelationKind::Contains);
            }
        }

        ctx.follow(&video_url, category.clone());
    }

    ctx.follow_next_page(page, PageKind::Listing);
}
