//! Business logic services

pub mod fines;
pub mod lending;

use std::sync::Arc;

use crate::{config::LendingConfig, repository::LendingStore};

pub use fines::FinePolicy;
pub use lending::LendingEngine;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub lending: LendingEngine,
}

impl Services {
    /// Create all services over the given store
    pub fn new(store: Arc<dyn LendingStore>, lending_config: LendingConfig) -> Self {
        Self {
            lending: LendingEngine::new(store, lending_config),
        }
    }
}
