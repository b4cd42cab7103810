use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-level error code, surfaced in API error bodies and per-task results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    ServiceUnavailable,
    ExecutionTimeout,
    ExecutionFailed,
    PlanNotFound,
    PlanAlreadyRunning,
    UpstreamFailure,
    PlanAborted,
    DeadlineExceeded,
    Config,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::ExecutionTimeout => "EXECUTION_TIMEOUT",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::PlanNotFound => "PLAN_NOT_FOUND",
            Self::PlanAlreadyRunning => "PLAN_ALREADY_RUNNING",
            Self::UpstreamFailure => "UPSTREAM_FAILURE",
            Self::PlanAborted => "PLAN_ABORTED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Config => "CONFIG",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WeaveError {
    // Request errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown template: {0}")]
    TemplateNotFound(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Plan is already running: {0}")]
    PlanAlreadyRunning(String),

    // Dispatch errors
    #[error("No online service provides any of: {capabilities}")]
    ServiceUnavailable { capabilities: String },

    #[error("Service {service} timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    #[error("Connection to service {service} failed: {message}")]
    Connection { service: String, message: String },

    #[error("Service {service} rejected the request: {message}")]
    Provider { service: String, message: String },

    #[error("Service {service} returned a malformed response: {message}")]
    MalformedResponse { service: String, message: String },

    #[error("Plan deadline exceeded")]
    DeadlineExceeded,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeaveError {
    /// The wire code this error is reported under.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) | Self::TemplateNotFound(_) | Self::Json(_) => {
                ErrorCode::Validation
            }
            Self::PlanNotFound(_) => ErrorCode::PlanNotFound,
            Self::PlanAlreadyRunning(_) => ErrorCode::PlanAlreadyRunning,
            Self::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            Self::Timeout { .. } => ErrorCode::ExecutionTimeout,
            Self::Connection { .. } | Self::Provider { .. } | Self::MalformedResponse { .. } => {
                ErrorCode::ExecutionFailed
            }
            Self::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            Self::Config(_) | Self::ConfigNotFound(_) => ErrorCode::Config,
            Self::Internal(_) | Self::Io(_) => ErrorCode::Internal,
        }
    }

    /// Timeouts and connection-level failures may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection { .. })
    }
}

pub type Result<T> = std::result::Result<T, WeaveError>;
