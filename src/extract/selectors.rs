//! Selector tables and their compiled form
//!
//! Extraction code only ever names logical fields (`video_title`, `next_page`, ...).
//! A table maps each field to a rule: comma-separated CSS selectors, each optionally
//! suffixed with `::text` or `::attr(name)`.

use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Logical field names
pub mod fields {
    pub const VIDEO_PLAYER: &str = "video_player";
    pub const CATEGORY_GRID: &str = "category_grid";
    pub const VIDEO_GRID: &str = "video_grid";

    pub const CATEGORY_ITEM: &str = "category_item";
    pub const CATEGORY_TITLE: &str = "category_title";
    pub const CATEGORY_URL: &str = "category_url";

    pub const VIDEO_ITEM: &str = "video_item";
    pub const VIDEO_URL: &str = "video_url";
    pub const VIDEO_TITLE: &str = "video_title";
    pub const VIDEO_THUMBNAIL: &str = "video_thumbnail";
    pub const VIDEO_DURATION: &str = "video_duration";
    pub const VIDEO_VIEWS: &str = "video_views";
    pub const NEXT_PAGE: &str = "next_page";

    pub const PAGE_TITLE: &str = "page_title";
    pub const VIDEO_INFO: &str = "video_info";
    pub const RELATED_VIDEOS: &str = "related_videos";
    pub const RELATED_VIDEO_ITEM: &str = "related_video_item";
    pub const RELATED_VIDEO_URL: &str = "related_video_url";
    pub const RELATED_VIDEO_TITLE: &str = "related_video_title";
}

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("invalid selector for '{field}': {rule} ({reason})")]
    Invalid {
        field: String,
        rule: String,
        reason: String,
    },
}

/// Mapping from logical field name to a site-specific rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorTable {
    rules: BTreeMap<String, String>,
}

impl SelectorTable {
    /// Generic selectors that work on common video site layouts
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for (field, rule) in [
            (fields::CATEGORY_GRID, "#categories, .categories, .category-list"),
            (fields::CATEGORY_ITEM, ".category-item, .cat-item, .thumb"),
            (fields::CATEGORY_TITLE, ".title::text, .name::text"),
            (fields::CATEGORY_URL, "a::attr(href)"),
            (fields::VIDEO_GRID, ".mozaique, .videos-grid, .video-list, .grid"),
            (fields::VIDEO_ITEM, ".thumb-block, .thumb-under, .video-item, .grid-item"),
            (fields::VIDEO_URL, ".thumb-under a::attr(href), a::attr(href)"),
            (fields::VIDEO_TITLE, ".title::text"),
            (fields::VIDEO_THUMBNAIL, "img::attr(src)"),
            (fields::VIDEO_DURATION, ".duration::text"),
            (fields::VIDEO_VIEWS, ".views::text"),
            (fields::NEXT_PAGE, ".next-page::attr(href), .pagination a.next-page::attr(href)"),
            (fields::PAGE_TITLE, "title::text"),
            (fields::VIDEO_PLAYER, "#video-player-bg, #player, .video-wrapper"),
            (fields::VIDEO_INFO, ".video-info, .info-wrapper"),
            (fields::RELATED_VIDEOS, "#related-videos .mozaique, .related-videos"),
            (fields::RELATED_VIDEO_ITEM, ".thumb-block"),
            (fields::RELATED_VIDEO_URL, ".thumb-under .title a::attr(href)"),
            (fields::RELATED_VIDEO_TITLE, ".thumb-under .title a::text"),
        ] {
            table.set(field, rule);
        }
        table
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.rules.get(field).map(String::as_str)
    }

    pub fn set(&mut self, field: &str, rule: &str) {
        self.rules.insert(field.to_string(), rule.to_string());
    }

    /// Overlay `other` on this table, field by field
    pub fn merge(&mut self, other: &SelectorTable) {
        for (field, rule) in &other.rules {
            self.rules.insert(field.clone(), rule.clone());
        }
    }
}

/// What a rule alternative yields
#[derive(Debug, Clone, PartialEq)]
enum Target {
    Element,
    Text,
    Attr(String),
}

#[derive(Debug)]
struct Alternative {
    /// None selects the scope element itself, as in a bare `::text`
    selector: Option<Selector>,
    target: Target,
}

/// Compiled form of one field's rule
#[derive(Debug)]
pub struct Rule {
    alternatives: Vec<Alternative>,
}

impl Rule {
    fn parse(field: &str, rule: &str) -> Result<Self, SelectorError> {
        let invalid = |reason: String| SelectorError::Invalid {
            field: field.to_string(),
            rule: rule.to_string(),
            reason,
        };

        let mut alternatives = Vec::new();
        for part in split_top_level(rule) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (css, target) = if let Some(css) = part.strip_suffix("::text") {
                (css, Target::Text)
            } else if let Some(start) = part.find("::attr(") {
                let name = part[start + "::attr(".len()..]
                    .strip_suffix(')')
                    .ok_or_else(|| invalid("unterminated ::attr(".to_string()))?
                    .trim();
                if name.is_empty() {
                    return Err(invalid("empty attribute name".to_string()));
                }
                (&part[..start], Target::Attr(name.to_string()))
            } else {
                (part, Target::Element)
            };

            let css = css.trim();
            let selector = if css.is_empty() {
                None
            } else {
                Some(Selector::parse(css).map_err(|e| invalid(format!("{:?}", e)))?)
            };
            alternatives.push(Alternative { selector, target });
        }

        if alternatives.is_empty() {
            return Err(invalid("rule has no selectors".to_string()));
        }
        Ok(Self { alternatives })
    }

    /// Elements in `scope` (itself included) matched by any alternative, deduplicated
    pub fn elements<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for alternative in &self.alternatives {
            for element in matching(alternative, scope) {
                if seen.insert(element.id()) {
                    found.push(element);
                }
            }
        }
        found
    }

    /// First non-empty value in `scope`, trying alternatives in order
    pub fn first_value(&self, scope: ElementRef<'_>) -> Option<String> {
        self.alternatives.iter().find_map(|alternative| {
            matching(alternative, scope)
                .into_iter()
                .find_map(|element| value_of(element, &alternative.target))
        })
    }
}

fn matching<'a>(alternative: &Alternative, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    match &alternative.selector {
        None => vec![scope],
        Some(selector) => {
            let mut found = Vec::new();
            if selector.matches(&scope) {
                found.push(scope);
            }
            found.extend(scope.select(selector));
            found
        }
    }
}

fn value_of(element: ElementRef<'_>, target: &Target) -> Option<String> {
    let value = match target {
        Target::Attr(name) => element.value().attr(name)?.trim().to_string(),
        Target::Text | Target::Element => element
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" "),
    };
    (!value.is_empty()).then_some(value)
}

/// Split a rule on commas that are not nested in parentheses or brackets
fn split_top_level(rule: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in rule.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&rule[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&rule[start..]);
    parts
}

/// All rules of one table, compiled once at startup
#[derive(Debug)]
pub struct CompiledSelectors {
    rules: HashMap<String, Rule>,
}

impl CompiledSelectors {
    pub fn compile(table: &SelectorTable) -> Result<Self, SelectorError> {
        let rules = table.rules.iter()
            .map(|(field, rule)| Ok((field.clone(), Rule::parse(field, rule)?)))
            .collect::<Result<HashMap<_, _>, SelectorError>>()?;
        Ok(Self { rules })
    }

    /// Rule for a field. A field missing from the table never matches.
    pub fn rule(&self, field: &str) -> Option<&Rule> {
        self.rules.get(field)
    }
}
