use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cli::config::{ExportFormat, OutputSettings};
use crate::storage::export::{extension, GraphSnapshot};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize graph: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("checkpoint task did not complete: {0}")]
    Join(String),
}

/// Writes graph snapshots to the output directory
///
/// Each snapshot is an owned copy, so writing happens off the control loop while the
/// graph keeps changing. Writes never overlap: a new snapshot first waits for the
/// previous one, so an older graph can never replace a newer file.
pub struct Checkpointer {
    output_dir: PathBuf,
    stem: String,
    formats: Vec<ExportFormat>,
    in_progress: Option<JoinHandle<Result<Vec<PathBuf>, CheckpointError>>>,
    written: usize,
    failed: usize,
    last_written: Vec<PathBuf>,
}

impl Checkpointer {
    pub fn new(settings: &OutputSettings) -> Self {
        Self {
            output_dir: settings.output_dir.clone(),
            stem: settings.graph_file_stem.clone(),
            formats: settings.formats.clone(),
            in_progress: None,
            written: 0,
            failed: 0,
            last_written: Vec::new(),
        }
    }

    /// Start writing `snapshot` in the background
    pub async fn snapshot(&mut self, snapshot: GraphSnapshot) {
        self.wait_in_progress().await;

        if snapshot.is_empty() {
            debug!("Skipping checkpoint of an empty graph");
            return;
        }

        info!(
            "Saving graph with {} nodes and {} edges",
            snapshot.nodes.len(),
            snapshot.edges.len()
        );
        let dir = self.output_dir.clone();
        let stem = self.stem.clone();
        let formats = self.formats.clone();
        self.in_progress = Some(tokio::spawn(async move {
            write_snapshot(&dir, &stem, &formats, &snapshot).await
        }));
    }

    /// Write the final snapshot and wait for it. Returns the files written.
    pub async fn finish(&mut self, snapshot: GraphSnapshot) -> Vec<PathBuf> {
        self.snapshot(snapshot).await;
        self.wait_in_progress().await;
        self.last_written.clone()
    }

    async fn wait_in_progress(&mut self) {
        let Some(handle) = self.in_progress.take() else {
            return;
        };

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(CheckpointError::Join(e.to_string())),
        };

        match result {
            Ok(paths) => {
                for path in &paths {
                    info!("Graph saved to {}", path.display());
                }
                self.written += 1;
                self.last_written = paths;
            }
            Err(e) => {
                // The next snapshot is the recovery path
                error!("Error saving graph: {}", e);
                self.failed += 1;
            }
        }
    }

    /// Snapshots written successfully
    pub fn written(&self) -> usize {
        self.written
    }

    /// Snapshots that failed to write
    pub fn failed(&self) -> usize {
        self.failed
    }
}

/// Write every format of `snapshot` into `dir` via temp file and rename
pub async fn write_snapshot(
    dir: &Path,
    stem: &str,
    formats: &[ExportFormat],
    snapshot: &GraphSnapshot,
) -> Result<Vec<PathBuf>, CheckpointError> {
    tokio::fs::create_dir_all(dir).await.map_err(|source| CheckpointError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut written = Vec::with_capacity(formats.len());
    for &format in formats {
        let contents = snapshot.render(format)?;
        let path = dir.join(format!("{}.{}", stem, extension(format)));
        let temp_path = dir.join(format!(".{}.{}.tmp", stem, extension(format)));

        tokio::fs::write(&temp_path, contents).await.map_err(|source| CheckpointError::Io {
            path: temp_path.clone(),
            source,
        })?;
        tokio::fs::rename(&temp_path, &path).await.map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::graph::{Detail, Entity, EntityGraph, EntityKind};
    use uuid::Uuid;

    fn settings(dir: &Path) -> OutputSettings {
        OutputSettings {
            output_dir: dir.to_path_buf(),
            ..OutputSettings::default()
        }
    }

    fn graph_with(ids: &[&str]) -> EntityGraph {
        let mut graph = EntityGraph::new();
        for id in ids {
            graph.upsert(Entity::new(*id, format!("https://example.com/video/{}", id), EntityKind::Video, 0, Detail::Full));
        }
        graph
    }

    #[tokio::test]
    async fn test_finish_writes_all_formats() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(&settings(dir.path()));
        let run_id = Uuid::new_v4();

        checkpointer.snapshot(GraphSnapshot::capture(&graph_with(&["a"]), run_id, "https://example.com/")).await;
        let paths = checkpointer
            .finish(GraphSnapshot::capture(&graph_with(&["a", "b"]), run_id, "https://example.com/"))
            .await;

        assert_eq!(paths.len(), 2);
        assert_eq!(checkpointer.written(), 2);
        assert_eq!(checkpointer.failed(), 0);

        let json = std::fs::read_to_string(dir.path().join("video_relationships.json")).unwrap();
        let parsed: GraphSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.nodes.len(), 2);
        assert!(dir.path().join("video_relationships.gexf").exists());
        assert!(!dir.path().join(".video_relationships.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_write_failure_is_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the output directory should be
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "not a directory").unwrap();

        let mut checkpointer = Checkpointer::new(&settings(&blocked));
        let paths = checkpointer
            .finish(GraphSnapshot::capture(&graph_with(&["a"]), Uuid::new_v4(), "https://example.com/"))
            .await;

        assert!(paths.is_empty());
        assert_eq!(checkpointer.failed(), 1);
        assert_eq!(checkpointer.written(), 0);
    }

    #[tokio::test]
    async fn test_empty_graph_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(&settings(dir.path()));
        let paths = checkpointer
            .finish(GraphSnapshot::capture(&EntityGraph::new(), Uuid::new_v4(), "https://example.com/"))
            .await;
        assert!(paths.is_empty());
        assert_eq!(checkpointer.written(), 0);
    }
}
