use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use weave_core::types::{Plan, PlanContext};
use weave_engine::{
    CollaborationResponse, PlanRequest, PlanSummary, TemplateDetail, TemplateListing,
    TemplateSuggestion,
};

use crate::middleware::{Authenticated, Operator};
use crate::protocol::ApiError;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

// GET /api/health (no auth)
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// POST /api/plans (Operator)
pub async fn create_plan(
    Operator(caller): Operator,
    State(state): State<Arc<AppState>>,
    body: Result<Json<PlanRequest>, JsonRejection>,
) -> ApiResult<PlanSummary> {
    let Json(request) = body?;
    let summary = state.orchestrator.create_plan(request)?;
    info!(caller = %caller.name, plan_id = %summary.id, "Plan created via API");
    Ok(Json(summary))
}

// GET /api/plans (Viewer+)
pub async fn list_plans(
    Authenticated(_caller): Authenticated,
    State(state): State<Arc<AppState>>,
) -> Json<Value> {
    let plans = state.orchestrator.plans();
    Json(json!({ "count": plans.len(), "plans": plans }))
}

// GET /api/plans/{id} (Viewer+)
pub async fn get_plan(
    Authenticated(_caller): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Plan> {
    Ok(Json(state.orchestrator.plan(&id)?))
}

// POST /api/plans/{id}/execute (Operator)
pub async fn execute_plan(
    Operator(caller): Operator,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<CollaborationResponse> {
    info!(caller = %caller.name, plan_id = %id, "Executing plan via API");
    let response = state.orchestrator.execute_plan(&id).await?;
    Ok(Json(response.as_ref().clone()))
}

#[derive(Deserialize)]
pub struct CollaborateBody {
    pub prompt: String,
    #[serde(default)]
    pub context: PlanContext,
}

// POST /api/collaborate (Operator)
pub async fn collaborate(
    Operator(caller): Operator,
    State(state): State<Arc<AppState>>,
    body: Result<Json<CollaborateBody>, JsonRejection>,
) -> ApiResult<CollaborationResponse> {
    let Json(body) = body?;
    info!(caller = %caller.name, "Auto collaboration requested");
    let request = PlanRequest::new(body.prompt).with_context(body.context);
    let response = state.orchestrator.collaborate(request).await?;
    Ok(Json(response.as_ref().clone()))
}

// POST /api/collaborate/template (Operator)
pub async fn collaborate_template(
    Operator(caller): Operator,
    State(state): State<Arc<AppState>>,
    body: Result<Json<PlanRequest>, JsonRejection>,
) -> ApiResult<CollaborationResponse> {
    let Json(request) = body?;
    let template = request
        .template
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::validation("template is required"))?;
    info!(caller = %caller.name, %template, "Template collaboration requested");
    let response = state.orchestrator.collaborate(request).await?;
    Ok(Json(response.as_ref().clone()))
}

// GET /api/templates (Viewer+)
pub async fn list_templates(
    Authenticated(_caller): Authenticated,
    State(state): State<Arc<AppState>>,
) -> Json<TemplateListing> {
    Json(state.orchestrator.templates())
}

// GET /api/templates/{name} (Viewer+)
pub async fn template_detail(
    Authenticated(_caller): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<TemplateDetail> {
    Ok(Json(state.orchestrator.template(&name)?))
}

#[derive(Deserialize)]
pub struct SuggestBody {
    pub prompt: String,
}

// POST /api/templates/suggest (Operator)
pub async fn suggest_template(
    Operator(_caller): Operator,
    State(state): State<Arc<AppState>>,
    body: Result<Json<SuggestBody>, JsonRejection>,
) -> ApiResult<TemplateSuggestion> {
    let Json(body) = body?;
    Ok(Json(state.orchestrator.suggest(&body.prompt)?))
}

// GET /api/services (Viewer+)
pub async fn list_services(
    Authenticated(_caller): Authenticated,
    State(state): State<Arc<AppState>>,
) -> Json<Value> {
    let services = state.orchestrator.services();
    Json(json!({ "count": services.len(), "services": services.as_slice() }))
}
