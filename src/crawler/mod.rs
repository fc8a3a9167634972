pub mod controller;
pub mod frontier;
pub mod pagination;
pub mod politeness;
pub mod scheduler;
pub mod task;
pub mod visited;

// Re-export common types
pub use controller::CrawlerController;
pub use scheduler::Scheduler;
pub use task::{CrawlTask, PageKind};
