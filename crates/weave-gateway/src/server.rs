use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use weave_core::config::GatewayConfig;
use weave_engine::Orchestrator;

use crate::routes;
use crate::state::AppState;

/// Build the API router over shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        // Plans
        .route("/api/plans", get(routes::list_plans).post(routes::create_plan))
        .route("/api/plans/{id}", get(routes::get_plan))
        .route("/api/plans/{id}/execute", post(routes::execute_plan))
        // One-shot collaboration
        .route("/api/collaborate", post(routes::collaborate))
        .route("/api/collaborate/template", post(routes::collaborate_template))
        // Templates
        .route("/api/templates", get(routes::list_templates))
        .route("/api/templates/suggest", post(routes::suggest_template))
        .route("/api/templates/{name}", get(routes::template_detail))
        // Services
        .route("/api/services", get(routes::list_services))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    orchestrator: Arc<Orchestrator>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            orchestrator: self.orchestrator.clone(),
        });
        let app = build_router(state);

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
