use serde::{Serialize, Deserialize};
use std::fmt;

/// Page type assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Video,
    Category,
    Listing,
    Unknown,
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageKind::Video => "video",
            PageKind::Category => "category",
            PageKind::Listing => "listing",
            PageKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Represents a fetch task waiting in the frontier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlTask {
    /// URL to render
    pub url: String,

    /// Hops from the start URL (0 for the seed)
    pub depth: u32,

    /// Entity that led to this URL (None for the seed)
    pub parent_id: Option<String>,

    /// Known page type, skips classification when set
    pub page_hint: Option<PageKind>,

    /// Pagination group this page belongs to, if it was reached through "next page"
    pub group: Option<String>,
}

impl CrawlTask {
    /// Create the seed task for a crawl
    pub fn seed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            depth: 0,
            parent_id: None,
            page_hint: None,
            group: None,
        }
    }

    /// Create a task one hop below `self`
    pub fn child(&self, url: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            url: url.into(),
            depth: self.depth + 1,
            parent_id,
            page_hint: None,
            group: None,
        }
    }

    /// Create the next page of a paginated group. Pagination keeps the current depth.
    pub fn next_page(&self, url: impl Into<String>, kind: PageKind, group: String) -> Self {
        Self {
            url: url.into(),
            depth: self.depth,
            parent_id: self.parent_id.clone(),
            page_hint: Some(kind),
            group: Some(group),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_and_next_page_depth() {
        let seed = CrawlTask::seed("https://example.com/videos");
        let child = seed.child("https://example.com/video/abc", Some("videos".to_string()));
        assert_eq!(child.depth, 1);
        assert_eq!(child.parent_id.as_deref(), Some("videos"));
        assert!(child.page_hint.is_none());

        let next = child.next_page("https://example.com/video/abc?page=2", PageKind::Listing, "g".to_string());
        assert_eq!(next.depth, 1);
        assert_eq!(next.page_hint, Some(PageKind::Listing));
        assert_eq!(next.group.as_deref(), Some("g"));
        assert_eq!(next.parent_id.as_deref(), Some("videos"));
    }
}
