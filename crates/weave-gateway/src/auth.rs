use weave_core::config::{ApiKeyRole, GatewayConfig};

/// Result of a successful authentication.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub name: String,
    pub role: ApiKeyRole,
}

/// Full validation: Bearer header -> api_keys -> legacy token -> query token -> anonymous.
///
/// Returns `Some(AuthResult)` on success, `None` on auth failure.
pub fn validate_auth(
    config: &GatewayConfig,
    bearer: Option<&str>,
    query_token: Option<&str>,
) -> Option<AuthResult> {
    let presented = bearer.or(query_token);

    if let Some(value) = presented {
        if let Some(key) = config.api_keys.iter().find(|k| k.key == value) {
            return Some(AuthResult {
                name: key.name.clone(),
                role: key.role.clone(),
            });
        }
        if config.token.as_deref() == Some(value) {
            return Some(AuthResult {
                name: "legacy-token".into(),
                role: ApiKeyRole::Operator,
            });
        }
        if bearer.is_some() || config.token.is_some() || !config.api_keys.is_empty() {
            return None;
        }
    }

    // No auth configured = anonymous access
    if config.token.is_none() && config.api_keys.is_empty() {
        Some(AuthResult {
            name: "anonymous".into(),
            role: ApiKeyRole::Operator,
        })
    } else {
        None
    }
}

/// Extract token from the query string (?token=...).
pub fn extract_token_from_query(query: &str) -> Option<&str> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
}

/// Check if a role may create or execute plans.
pub fn has_operator_access(role: &ApiKeyRole) -> bool {
    matches!(role, ApiKeyRole::Operator)
}
