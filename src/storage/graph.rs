//! Entity graph built up during a crawl
//!
//! Nodes live in an arena indexed by their position; ids map to positions. Only the
//! crawl control loop mutates the graph, so no locking is involved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Video,
    Category,
}

/// How much of an entity has been observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detail {
    /// Seen only as a link on another page
    Stub,
    /// Its own page was rendered and extracted
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Related,
    Contains,
}

/// A graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub kind: EntityKind,
    pub depth: u32,
    pub discovered_at: DateTime<Utc>,
    pub detail: Detail,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
}

impl Entity {
    pub fn new(id: impl Into<String>, url: impl Into<String>, kind: EntityKind, depth: u32, detail: Detail) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: None,
            kind,
            depth,
            discovered_at: Utc::now(),
            detail,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title.filter(|t| !t.trim().is_empty());
        self
    }

    /// Set an optional attribute; absent or empty values are ignored
    pub fn with_attribute(mut self, name: &str, value: Option<String>) -> Self {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.attributes.insert(name.to_string(), value);
        }
        self
    }

    /// Fold a later observation of the same id into this entity
    ///
    /// Non-empty incoming fields overwrite, empty ones never erase. The discovery time
    /// stays at first observation, depth keeps the minimum, and kind follows the more
    /// detailed observation.
    fn merge(&mut self, incoming: Entity) {
        if !incoming.url.is_empty() {
            self.url = incoming.url;
        }
        if incoming.title.is_some() {
            self.title = incoming.title;
        }
        if incoming.detail >= self.detail {
            self.kind = incoming.kind;
        }
        self.detail = self.detail.max(incoming.detail);
        self.depth = self.depth.min(incoming.depth);
        for (name, value) in incoming.attributes {
            if !value.is_empty() {
                self.attributes.insert(name, value);
            }
        }
    }
}

/// A graph edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub from: String,
    pub to: String,
    pub kind: RelationKind,
}

/// Result of writing an entity into the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A new node was created
    Created,
    /// An existing node was updated without changing its detail level
    Merged,
    /// An existing stub became a fully scraped node
    Promoted,
}

#[derive(Debug, Default)]
pub struct EntityGraph {
    nodes: Vec<Entity>,
    index: HashMap<String, usize>,
    edges: Vec<(usize, usize, RelationKind)>,
    edge_set: HashSet<(usize, usize, RelationKind)>,
    /// Video nodes whose own page was scraped
    scraped_videos: usize,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge an entity, keyed by its id
    pub fn upsert(&mut self, entity: Entity) -> Upsert {
        let counts = entity.kind == EntityKind::Video && entity.detail == Detail::Full;

        match self.index.get(&entity.id) {
            Some(&position) => {
                let node = &mut self.nodes[position];
                let was_full = node.kind == EntityKind::Video && node.detail == Detail::Full;
                node.merge(entity);
                let is_full = node.kind == EntityKind::Video && node.detail == Detail::Full;
                if is_full && !was_full {
                    self.scraped_videos += 1;
                    Upsert::Promoted
                } else {
                    Upsert::Merged
                }
            }
            None => {
                if counts {
                    self.scraped_videos += 1;
                }
                self.index.insert(entity.id.clone(), self.nodes.len());
                self.nodes.push(entity);
                Upsert::Created
            }
        }
    }

    /// Add an edge between two existing nodes. Returns false if either end is unknown
    /// or the same (from, to, kind) edge already exists.
    pub fn add_relation(&mut self, from: &str, to: &str, kind: RelationKind) -> bool {
        let (Some(&from), Some(&to)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        if !self.edge_set.insert((from, to, kind)) {
            return false;
        }
        self.edges.push((from, to, kind));
        true
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.index.get(id).map(|&position| &self.nodes[position])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Entity> {
        self.nodes.iter()
    }

    /// Edges in insertion order
    pub fn relations(&self) -> impl Iterator<Item = Relation> + '_ {
        self.edges.iter().map(|&(from, to, kind)| Relation {
            from: self.nodes[from].id.clone(),
            to: self.nodes[to].id.clone(),
            kind,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn scraped_videos(&self) -> usize {
        self.scraped_videos
    }

    pub fn count_where(&self, kind: EntityKind, detail: Detail) -> usize {
        self.nodes.iter().filter(|n| n.kind == kind && n.detail == detail).count()
    }
}
