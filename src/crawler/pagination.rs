use std::collections::HashMap;
use tracing::{debug, info};

/// Per-group counters bounding how many "next page" links of one listing are followed
///
/// A counter counts the next-page tasks already enqueued for its group. The first page
/// of a group is never counted, so a group spans at most `max_pages` pages.
#[derive(Debug)]
pub struct PaginationLedger {
    max_pages: u32,
    pages: HashMap<String, u32>,
}

impl PaginationLedger {
    pub fn new(max_pages: u32) -> Self {
        Self {
            max_pages,
            pages: HashMap::new(),
        }
    }

    /// Whether one more page of `group` may still be followed
    pub fn can_follow(&self, group: &str) -> bool {
        self.followed(group) + 1 < self.max_pages
    }

    /// Reserve the next page of `group`. Returns the page number being followed
    /// (2 for the first "next"), or None once the group reached the ceiling.
    pub fn try_follow(&mut self, group: &str) -> Option<u32> {
        if !self.can_follow(group) {
            info!("Reached maximum pages ({}) for {}", self.max_pages, group);
            return None;
        }

        let counter = self.pages.entry(group.to_string()).or_insert(0);
        *counter += 1;
        debug!("Following next page {} for {}", *counter + 1, group);
        Some(*counter + 1)
    }

    /// Number of next pages followed so far for `group`
    pub fn followed(&self, group: &str) -> u32 {
        self.pages.get(group).copied().unwrap_or(0)
    }

    /// Number of groups seen
    pub fn groups(&self) -> usize {
        self.pages.len()
    }
}
