use std::sync::Arc;

use weave_core::config::GatewayConfig;
use weave_engine::Orchestrator;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub orchestrator: Arc<Orchestrator>,
}
