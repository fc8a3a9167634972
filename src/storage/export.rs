//! Node/edge export formats consumed by downstream graph tools

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use uuid::Uuid;

use crate::cli::config::ExportFormat;
use crate::storage::graph::{Entity, EntityGraph, Relation};

/// Run-level metadata written alongside the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMeta {
    pub run_id: Uuid,
    pub start_url: String,
    pub generated_at: DateTime<Utc>,
}

/// Point-in-time copy of the graph, detached from the live one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub graph: GraphMeta,
    pub nodes: Vec<Entity>,
    pub edges: Vec<Relation>,
}

impl GraphSnapshot {
    pub fn capture(graph: &EntityGraph, run_id: Uuid, start_url: &str) -> Self {
        Self {
            graph: GraphMeta {
                run_id,
                start_url: start_url.to_string(),
                generated_at: Utc::now(),
            },
            nodes: graph.nodes().cloned().collect(),
            edges: graph.relations().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Render the snapshot in the given format
    pub fn render(&self, format: ExportFormat) -> Result<String, serde_json::Error> {
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(self),
            ExportFormat::Gexf => Ok(self.to_gexf()),
        }
    }

    /// GEXF 1.2 document with one attribute column per node field
    fn to_gexf(&self) -> String {
        let extra: BTreeSet<&str> = self.nodes.iter()
            .flat_map(|node| node.attributes.keys().map(String::as_str))
            .collect();
        const FIXED: [&str; 5] = ["url", "kind", "depth", "discoveredAt", "detail"];
        let mut columns: Vec<&str> = FIXED.to_vec();
        columns.extend(extra.into_iter().filter(|key| !FIXED.contains(key)));

        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<gexf xmlns=\"http://www.gexf.net/1.2draft\" version=\"1.2\">\n");
        let _ = writeln!(
            out,
            "  <meta lastmodifieddate=\"{}\">\n    <creator>graph-spider</creator>\n    <description>{}</description>\n  </meta>",
            self.graph.generated_at.format("%Y-%m-%d"),
            escape(&self.graph.start_url)
        );
        out.push_str("  <graph mode=\"static\" defaultedgetype=\"directed\">\n");

        out.push_str("    <attributes class=\"node\">\n");
        for (i, column) in columns.iter().enumerate() {
            let kind = if *column == "depth" { "integer" } else { "string" };
            let _ = writeln!(out, "      <attribute id=\"{}\" title=\"{}\" type=\"{}\"/>", i, escape(column), kind);
        }
        out.push_str("    </attributes>\n");

        out.push_str("    <nodes>\n");
        for node in &self.nodes {
            let label = node.title.as_deref().unwrap_or(&node.id);
            let _ = writeln!(out, "      <node id=\"{}\" label=\"{}\">", escape(&node.id), escape(label));
            out.push_str("        <attvalues>\n");
            for (i, column) in columns.iter().enumerate() {
                let value = match *column {
                    "url" => Some(node.url.clone()),
                    "kind" => Some(format!("{:?}", node.kind).to_lowercase()),
                    "depth" => Some(node.depth.to_string()),
                    "discoveredAt" => Some(node.discovered_at.to_rfc3339()),
                    "detail" => Some(format!("{:?}", node.detail).to_lowercase()),
                    key => node.attributes.get(key).cloned(),
                };
                if let Some(value) = value {
                    let _ = writeln!(out, "          <attvalue for=\"{}\" value=\"{}\"/>", i, escape(&value));
                }
            }
            out.push_str("        </attvalues>\n");
            out.push_str("      </node>\n");
        }
        out.push_str("    </nodes>\n");

        out.push_str("    <edges>\n");
        for (i, edge) in self.edges.iter().enumerate() {
            let _ = writeln!(
                out,
                "      <edge id=\"{}\" source=\"{}\" target=\"{}\" label=\"{}\"/>",
                i,
                escape(&edge.from),
                escape(&edge.to),
                format!("{:?}", edge.kind).to_lowercase()
            );
        }
        out.push_str("    </edges>\n");
        out.push_str("  </graph>\n</gexf>\n");
        out
    }
}

/// File extension for each export format
pub fn extension(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Json => "json",
        ExportFormat::Gexf => "gexf",
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => escaped.push(c),
        }
    }
    escaped
}
