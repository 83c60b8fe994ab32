//! Book lending transaction engine
//!
//! Issues and returns library copies against a shared inventory ledger,
//! keeping copy counters and borrow records consistent under concurrent
//! requests, and computes overdue fines on return.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
