use crate::crawler::task::PageKind;
use crate::extract::page::ParsedPage;
use crate::extract::selectors::fields;

/// Decide what kind of page was rendered
///
/// Checked in order: a video player wins over a category grid, which wins over a
/// video grid. Anything else is `Unknown`.
pub fn classify(page: &ParsedPage<'_>) -> PageKind {
    if page.has(fields::VIDEO_PLAYER) {
        PageKind::Video
    } else if page.has(fields::CATEGORY_GRID) {
        PageKind::Category
    } else if page.has(fields::VIDEO_GRID) {
        PageKind::Listing
    } else {
        PageKind::Unknown
    }
}
