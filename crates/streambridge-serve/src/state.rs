//! Shared application state for request handlers.

use std::sync::Arc;

use streambridge_core::ConfigHandle;

use crate::processor::EventProcessor;

/// State available to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigHandle>,
    pub processor: Arc<EventProcessor>,
}

impl AppState {
    pub fn new(config: Arc<ConfigHandle>, processor: Arc<EventProcessor>) -> Self {
        Self { config, processor }
    }
}
