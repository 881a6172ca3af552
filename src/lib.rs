//! Skillhub - backend service for the agent-skills marketplace
//!
//! Re-exports the workspace crates under stable module names:
//! - `core`: shared types (skill summaries, search requests)
//! - `store`: SQLite catalog store
//! - `search`: two-path search planner
//! - `ratelimit`: fixed-window rate limiter
//! - `api`: axum HTTP surface

pub use skillhub_api as api;
pub use skillhub_core as core;
pub use skillhub_ratelimit as ratelimit;
pub use skillhub_search as search;
pub use skillhub_store as store;
