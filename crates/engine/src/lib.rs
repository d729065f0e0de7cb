//! Reverie narrative runtime engine.
//!
//! Executes authored narrative programs (directed graphs of dialogue, choice,
//! action-block, and branch nodes) against per-session relationship state,
//! suspending for player choices and external generation and resuming from
//! persisted execution state.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod stores;
pub mod use_cases;

pub use app::{App, Ports};
pub use config::EngineConfig;
pub use error::RuntimeError;
