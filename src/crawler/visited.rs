use std::collections::HashSet;
use url::Url;

/// Normalize a URL to avoid duplicates due to minor differences
///
/// The url crate already lower-cases the host and drops default ports; on top of that
/// the fragment is removed and query parameters are sorted by key.
pub fn normalize_url(url: &str) -> String {
    let mut normalized = match Url::parse(url) {
        Ok(url) => url,
        Err(_) => return url.to_string(), // Can't normalize, return as is
    };

    // Remove fragments (anchors)
    normalized.set_fragment(None);

    // Sort query parameters if present
    if let Some(query) = normalized.query() {
        if query.is_empty() {
            normalized.set_query(None);
        } else {
            let mut params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
            params.sort_by(|a, b| param_key(a).cmp(param_key(b)));
            let sorted_query = params.join("&");
            normalized.set_query(Some(&sorted_query));
        }
    }

    normalized.to_string()
}

fn param_key(pair: &str) -> &str {
    pair.split('=').next().unwrap_or("")
}

/// Key of the pagination group a page belongs to: normalized URL without its query
pub fn group_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.set_query(None);
            parsed.to_string()
        }
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

/// Derive an entity id from a URL: the last non-empty path segment
///
/// Falls back to the host for URLs without a path, and to the raw string when the URL
/// cannot be parsed.
pub fn entity_id(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
            .or_else(|| parsed.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string()),
        Err(_) => url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(url)
            .to_string(),
    }
}

/// Exact-membership set of normalized URLs that were enqueued or fetched
#[derive(Debug, Default)]
pub struct VisitedSet {
    urls: HashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a URL. Returns false if it was already present.
    pub fn insert(&mut self, url: &str) -> bool {
        self.urls.insert(normalize_url(url))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(&normalize_url(url))
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        // Test case insensitivity in host
        assert_eq!(normalize_url("https://EXAMPLE.com/path"), "https://example.com/path");

        // Test removal of default ports
        assert_eq!(normalize_url("https://example.com:443/path"), "https://example.com/path");

        // Test query parameter sorting
        assert_eq!(
            normalize_url("https://example.com/search?b=2&a=1"),
            "https://example.com/search?a=1&b=2"
        );

        // Test fragment removal
        assert_eq!(normalize_url("https://example.com/page#section"), "https://example.com/page");
    }

    #[test]
    fn test_group_key_strips_query() {
        assert_eq!(
            group_key("https://example.com/videos?page=3#top"),
            "https://example.com/videos"
        );
        assert_eq!(group_key("https://example.com/videos"), group_key("https://example.com/videos?page=2"));
    }

    #[test]
    fn test_entity_id() {
        assert_eq!(entity_id("https://example.com/video/abc123/"), "abc123");
        assert_eq!(entity_id("https://example.com/video/abc123?x=1"), "abc123");
        assert_eq!(entity_id("https://example.com/"), "example.com");
        assert_eq!(entity_id("not a url/foo/"), "foo");
    }

    #[test]
    fn test_visited_set_dedup() {
        let mut visited = VisitedSet::new();
        assert!(visited.insert("https://example.com/a#one"));
        assert!(!visited.insert("https://example.com/a#two"));
        assert!(visited.contains("https://EXAMPLE.com/a"));
        assert!(!visited.contains("https://example.com/b"));
        assert_eq!(visited.len(), 1);
    }
}
