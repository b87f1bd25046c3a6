//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use servelm_core::Orchestrator;

use crate::config::Config;

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Queue in front of the single generation worker.
    pub orchestrator: Orchestrator,
}
