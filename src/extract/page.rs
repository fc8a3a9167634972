use scraper::{ElementRef, Html};
use url::Url;

use crate::extract::selectors::CompiledSelectors;

/// A rendered page parsed once and queried by logical field name
pub struct ParsedPage<'s> {
    url: Url,
    document: Html,
    selectors: &'s CompiledSelectors,
}

impl<'s> ParsedPage<'s> {
    pub fn new(url: Url, html: &str, selectors: &'s CompiledSelectors) -> Self {
        Self {
            url,
            document: Html::parse_document(html),
            selectors,
        }
    }

    /// Final URL of the page, used to resolve relative links
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether any element on the page matches `field`
    pub fn has(&self, field: &str) -> bool {
        !self.select(field).is_empty()
    }

    /// Elements matched by `field` anywhere on the page
    pub fn select(&self, field: &str) -> Vec<ElementRef<'_>> {
        self.select_in(self.document.root_element(), field)
    }

    /// Elements matched by `field` inside `scope`
    pub fn select_in<'a>(&self, scope: ElementRef<'a>, field: &str) -> Vec<ElementRef<'a>> {
        self.selectors
            .rule(field)
            .map(|rule| rule.elements(scope))
            .unwrap_or_default()
    }

    /// `item` elements found inside every `container` element
    pub fn select_nested(&self, container: &str, item: &str) -> Vec<ElementRef<'_>> {
        let mut items = Vec::new();
        for scope in self.select(container) {
            for element in self.select_in(scope, item) {
                if !items.iter().any(|seen: &ElementRef<'_>| seen.id() == element.id()) {
                    items.push(element);
                }
            }
        }
        items
    }

    /// First value of `field` on the page
    pub fn value(&self, field: &str) -> Option<String> {
        self.value_in(self.document.root_element(), field)
    }

    /// First value of `field` inside `scope`
    pub fn value_in(&self, scope: ElementRef<'_>, field: &str) -> Option<String> {
        self.selectors.rule(field)?.first_value(scope)
    }

    /// Resolve a link found on the page against the page URL
    pub fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with("javascript:") {
            return None;
        }
        self.url.join(href).ok().map(|mut url| {
            url.set_fragment(None);
            url.to_string()
        })
    }

    /// Resolved URL of `field` inside `scope`
    pub fn link_in(&self, scope: ElementRef<'_>, field: &str) -> Option<String> {
        self.value_in(scope, field).and_then(|href| self.resolve(&href))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::selectors::{fields, SelectorTable};

    #[test]
    fn test_nested_items_and_links() {
        let selectors = CompiledSelectors::compile(&SelectorTable::builtin()).unwrap();
        let html = r#"
            <html><head><title>Watch</title></head><body>
              <div id="related-videos"><div class="mozaique">
                <div class="thumb-block"><div class="thumb-under"><p class="title"><a href="/video/r1">R1</a></p></div></div>
                <div class="thumb-block"><div class="thumb-under"><p class="title"><a href="r2#t">R2</a></p></div></div>
              </div></div>
            </body></html>"#;
        let url = Url::parse("https://example.com/video/abc").unwrap();
        let page = ParsedPage::new(url, html, &selectors);

        assert_eq!(page.value(fields::PAGE_TITLE).as_deref(), Some("Watch"));
        let items = page.select_nested(fields::RELATED_VIDEOS, fields::RELATED_VIDEO_ITEM);
        assert_eq!(items.len(), 2);
        assert_eq!(
            page.link_in(items[0], fields::RELATED_VIDEO_URL).as_deref(),
            Some("https://example.com/video/r1")
        );
        assert_eq!(
            page.link_in(items[1], fields::RELATED_VIDEO_URL).as_deref(),
            Some("https://example.com/video/r2")
        );
        assert_eq!(page.value_in(items[1], fields::RELATED_VIDEO_TITLE).as_deref(), Some("R2"));
    }

    #[test]
    fn test_resolve_rejects_script_links() {
        let selectors = CompiledSelectors::compile(&SelectorTable::default()).unwrap();
        let page = ParsedPage::new(Url::parse("https://example.com/").unwrap(), "<p></p>", &selectors);
        assert_eq!(page.resolve("javascript:void(0)"), None);
        assert_eq!(page.resolve("  "), None);
        assert!(!page.has(fields::VIDEO_PLAYER));
    }
}
