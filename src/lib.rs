//! Questline - gamified e-learning engine
//!
//! - A curriculum tree (categories, chapters, sections, blocks) gated by a
//!   strict completion chain
//! - Optimistic block completion with rollback when persistence fails
//! - Factions, points, achievements and live leaderboards
//! - Hosted (REST + realtime websocket) and local (SQLite) backends
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use questline::{App, AppSettings, LocalBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = Arc::new(LocalBackend::in_memory()?);
//!     let mut app = App::new(backend, AppSettings::default());
//!     app.register("learner@example.com", "secret1", "Learner").await?;
//!     app.login("learner@example.com", "secret1").await?;
//!     app.continue_learning().await?;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod types;
pub mod error;
pub mod config;
pub mod faction;
pub mod learning;
pub mod backend;
pub mod security;
pub mod bookmark;

// Client
pub mod app;
pub mod render;
pub mod cli;
pub mod interactive;

pub use app::{App, AppSettings};
pub use backend::{LearningBackend, LocalBackend, RestBackend};
pub use config::Config;
pub use error::{AppError, AppResult, BackendError, BackendResult};
pub use learning::{LearningMap, ProgressState, UnlockEvaluator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Gamified e-learning engine", NAME, VERSION)
}
