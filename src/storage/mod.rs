pub mod checkpoint;
pub mod export;
pub mod graph;

// Re-export common types
pub use checkpoint::Checkpointer;
pub use export::GraphSnapshot;
pub use graph::{Entity, EntityGraph, EntityKind, RelationKind};
