use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use weave_core::error::{ErrorCode, WeaveError};

/// Error body returned by every API route.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub error_code: ErrorCode,
    pub details: Value,
    pub suggested_actions: Vec<String>,
    #[serde(skip)]
    status: StatusCode,
}

impl ApiError {
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_code: code,
            details: json!({}),
            suggested_actions: suggested_actions(code),
            status: status_for(code),
        }
    }

    pub fn validation(error: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, error)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::PlanNotFound => StatusCode::NOT_FOUND,
        ErrorCode::PlanAlreadyRunning => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn suggested_actions(code: ErrorCode) -> Vec<String> {
    let actions: &[&str] = match code {
        ErrorCode::Validation => &[
            "Check the request body against the API schema",
            "List available templates with GET /api/templates",
        ],
        ErrorCode::PlanNotFound => &[
            "Create a plan with POST /api/plans",
            "List known plans with GET /api/plans",
        ],
        ErrorCode::PlanAlreadyRunning => &[
            "Retry once the current execution finishes to get the cached result",
        ],
        ErrorCode::ServiceUnavailable => &["Check service health with GET /api/services"],
        _ => &["Retry the request", "Check the gateway logs"],
    };
    actions.iter().map(|a| a.to_string()).collect()
}

impl From<WeaveError> for ApiError {
    fn from(e: WeaveError) -> Self {
        let details = match &e {
            WeaveError::TemplateNotFound(name) => json!({ "template": name }),
            WeaveError::PlanNotFound(id) | WeaveError::PlanAlreadyRunning(id) => {
                json!({ "plan_id": id })
            }
            WeaveError::ServiceUnavailable { capabilities } => {
                json!({ "capabilities": capabilities })
            }
            _ => json!({}),
        };
        Self::new(e.code(), e.to_string()).with_details(details)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(format!("Malformed request: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(WeaveError::TemplateNotFound("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(WeaveError::PlanNotFound("p".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(WeaveError::PlanAlreadyRunning("p".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(WeaveError::Internal("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_body_shape() {
        let err = ApiError::from(WeaveError::PlanNotFound("p1".into()));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error_code"], "PLAN_NOT_FOUND");
        assert_eq!(json["details"]["plan_id"], "p1");
        assert!(!json["suggested_actions"].as_array().unwrap().is_empty());
        assert!(json.get("status").is_none());
    }
}
