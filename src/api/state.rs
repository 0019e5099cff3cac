//! Application state for the API server

use crate::{Config, IngestEngine};
use std::sync::Arc;

/// Shared state handed to every route handler
#[derive(Clone)]
pub struct AppState {
    /// Engine running the jobs
    pub engine: Arc<IngestEngine>,

    /// Configuration the server was started with
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(engine: Arc<IngestEngine>, config: Arc<Config>) -> Self {
        Self { engine, config }
    }
}
