use tracing::{debug, info};

use crate::crawler::visited::entity_id;
use crate::extract::page::ParsedPage;
use crate::extract::selectors::fields;
use crate::extract::ExtractContext;
use crate::storage::graph::{Detail, Entity, EntityKind, RelationKind, Upsert};

/// Record the video itself, then its related videos as stubs with edges
pub fn extract(page: &ParsedPage<'_>, ctx: &mut ExtractContext<'_>) {
    let url = page.url().to_string();
    let id = entity_id(&url);
    let depth = ctx.task.depth;

    let video = Entity::new(&id, &url, EntityKind::Video, depth, Detail::Full)
        .with_title(page.value(fields::PAGE_TITLE))
        .with_attribute("info", page.value(fields::VIDEO_INFO))
        .with_attribute("screenshot", ctx.screenshot.clone());

    match ctx.record(video) {
        Upsert::Created | Upsert::Promoted => {
            ctx.summary.videos_scraped += 1;
            info!(
                "Scraped video {} ({}/{})",
                id,
                ctx.graph.scraped_videos(),
                ctx.limits.max_videos
            );
        }
        Upsert::Merged => debug!("Video {} was already scraped", id),
    }

    if !ctx.can_descend() {
        debug!("Related videos of {} are beyond the depth limit", id);
        return;
    }

    let child_depth = ctx.child_depth();
    for item in page.select_nested(fields::RELATED_VIDEOS, fields::RELATED_VIDEO_ITEM) {
        let Some(related_url) = page.link_in(item, fields::RELATED_VIDEO_URL) else {
            continue;
        };
        let related_id = entity_id(&related_url);
        let stub = Entity::new(&related_id, &related_url, EntityKind::Video, child_depth, Detail::Stub)
            .with_title(page.value_in(item, fields::RELATED_VIDEO_TITLE));

        ctx.record(stub);
        ctx.relate(&id, &related_id, RelationKind::Related);
        ctx.follow(&related_url, Some(id.clone()));
    }
}
