use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeaveError};
use crate::types::{HealthStatus, ServiceDescriptor};

/// Top-level Weave configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-attempt timeout for a single service call.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    /// Upper bound on tasks dispatched at once within a wave (unset = unbounded).
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: default_task_timeout(),
            max_concurrency: None,
            retry: RetryConfig::default(),
        }
    }
}

fn default_task_timeout() -> u64 { 60 }

/// Retry configuration for service calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Scale each backoff by a random factor in [0.8, 1.2].
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            jitter: false,
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Health probing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_run_path")]
    pub run_path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
            health_path: default_health_path(),
            run_path: default_run_path(),
        }
    }
}

fn default_probe_interval() -> u64 { 30 }
fn default_probe_timeout() -> u64 { 5 }
fn default_health_path() -> String { "/health".to_string() }
fn default_run_path() -> String { "/run".to_string() }

/// A statically configured capability provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

impl ServiceConfig {
    /// Descriptor with `unknown` health; the first probe settles it.
    pub fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::new(&self.name, &self.endpoint)
            .with_capabilities(self.capabilities.iter().cloned())
            .with_priority(self.priority)
            .with_status(HealthStatus::Unknown)
    }
}

/// A user-defined workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_complexity")]
    pub complexity: String,
    #[serde(default = "default_estimated_duration")]
    pub estimated_duration_secs: u64,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub tasks: Vec<TemplateTaskConfig>,
}

fn default_complexity() -> String { "medium".to_string() }
fn default_estimated_duration() -> u64 { 120 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateTaskConfig {
    /// Task id within the template; defaults to the task type.
    #[serde(default)]
    pub id: Option<String>,
    pub task_type: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
            api_keys: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub role: ApiKeyRole,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyRole {
    /// Read-only access: templates, plans, services.
    Viewer,
    /// Can create and execute plans.
    #[default]
    Operator,
}

fn default_bind() -> String { "127.0.0.1:18790".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeaveError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| WeaveError::Config(e.to_string()))?;
        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            services = config.services.len(),
            templates = config.templates.len(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Reject duplicate service names and empty endpoints.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for svc in &self.services {
            if svc.name.trim().is_empty() {
                return Err(WeaveError::Config("service name must not be empty".into()));
            }
            if svc.endpoint.trim().is_empty() {
                return Err(WeaveError::Config(format!(
                    "service '{}' has no endpoint",
                    svc.name
                )));
            }
            if !seen.insert(svc.name.as_str()) {
                return Err(WeaveError::Config(format!(
                    "duplicate service name '{}'",
                    svc.name
                )));
            }
        }
        if let Some(0) = self.engine.max_concurrency {
            return Err(WeaveError::Config(
                "engine.max_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
