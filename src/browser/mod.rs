pub mod remote;
pub mod retry;
pub mod script;

// Re-export common types
pub use remote::{RenderClient, RenderError, RenderRequest, RenderedPage, SplashClient};
pub use retry::RetryingClient;
