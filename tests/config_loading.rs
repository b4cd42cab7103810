use std::io::Write;
use std::sync::Arc;

use weave_core::config::{ApiKeyRole, AppConfig};
use weave_core::error::WeaveError;
use weave_core::event::EventBus;
use weave_core::types::HealthStatus;
use weave_engine::{Orchestrator, PlanRequest};
use weave_test_utils::ScriptedClient;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write toml");
    tmp
}

#[test]
fn test_load_full_config_from_file() {
    let tmp = write_config(
        r#"
[engine]
task_timeout_secs = 20
max_concurrency = 4

[engine.retry]
max_retries = 2
initial_backoff_ms = 250

[registry]
probe_interval_secs = 10
health_path = "/healthz"

[[services]]
name = "search-index"
endpoint = "http://localhost:7001"
capabilities = ["research", "search"]
priority = 5

[[services]]
name = "local-llm"
endpoint = "http://localhost:11434"
capabilities = ["reasoning", "coding", "writing", "summarization"]

[gateway]
bind = "0.0.0.0:9999"
token = "test-token"

[[gateway.api_keys]]
name = "dashboard"
key = "wk_dash"
role = "viewer"
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.task_timeout_secs, 20);
    assert_eq!(config.engine.max_concurrency, Some(4));
    assert_eq!(config.engine.retry.max_retries, 2);
    assert_eq!(config.engine.retry.initial_backoff_ms, 250);
    assert_eq!(config.engine.retry.max_backoff_ms, 30000);
    assert_eq!(config.registry.probe_interval_secs, 10);
    assert_eq!(config.registry.probe_timeout_secs, 5);
    assert_eq!(config.registry.health_path, "/healthz");

    assert_eq!(config.services.len(), 2);
    assert_eq!(config.services[1].priority, 0);
    let descriptor = config.services[0].descriptor();
    assert_eq!(descriptor.status, HealthStatus::Unknown);
    assert!(descriptor.capabilities.contains("search"));

    let gw = config.gateway.expect("gateway present");
    assert_eq!(gw.bind, "0.0.0.0:9999");
    assert_eq!(gw.api_keys[0].role, ApiKeyRole::Viewer);
}

#[test]
fn test_empty_config_uses_defaults() {
    let tmp = write_config("");
    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.engine.task_timeout_secs, 60);
    assert_eq!(config.engine.max_concurrency, None);
    assert_eq!(config.engine.retry.max_retries, 3);
    assert_eq!(config.registry.probe_interval_secs, 30);
    assert!(config.services.is_empty());
    assert!(config.gateway.is_none());
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("WEAVE_TEST_SEARCH_URL", "http://search.internal:8080");
    let tmp = write_config(
        r#"
[[services]]
name = "search"
endpoint = "${WEAVE_TEST_SEARCH_URL}"
capabilities = ["research"]
"#,
    );
    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.services[0].endpoint, "http://search.internal:8080");
    std::env::remove_var("WEAVE_TEST_SEARCH_URL");
}

#[test]
fn test_invalid_configs_are_rejected() {
    let duplicate = write_config(
        r#"
[[services]]
name = "a"
endpoint = "http://a"

[[services]]
name = "a"
endpoint = "http://b"
"#,
    );
    assert!(matches!(
        AppConfig::load(duplicate.path()),
        Err(WeaveError::Config(_))
    ));

    let malformed = write_config("[engine\ntask_timeout_secs = ");
    assert!(matches!(
        AppConfig::load(malformed.path()),
        Err(WeaveError::Config(_))
    ));

    assert!(matches!(
        AppConfig::load(std::path::Path::new("/nonexistent/weave.toml")),
        Err(WeaveError::ConfigNotFound(_))
    ));
}

#[tokio::test]
async fn test_custom_template_from_config_is_usable() {
    let tmp = write_config(
        r#"
[[services]]
name = "translator"
endpoint = "http://localhost:7100"
capabilities = ["translation"]

[[services]]
name = "reviewer"
endpoint = "http://localhost:7101"
capabilities = ["review", "reasoning"]

[[templates]]
name = "translate_review"
description = "Translate, then review the translation"
complexity = "low"
estimated_duration_secs = 45
keywords = ["translate", "translation"]

[[templates.tasks]]
task_type = "translation"
capabilities = ["translation"]
role = "You are a professional translator."

[[templates.tasks]]
task_type = "review"
depends_on = ["translation"]
"#,
    );
    let config = AppConfig::load(tmp.path()).expect("load config");

    let client = Arc::new(ScriptedClient::new());
    let orchestrator = Orchestrator::from_config(&config, client.clone(), Arc::new(EventBus::default()))
        .expect("build orchestrator");

    assert_eq!(
        orchestrator.suggest("Translate this letter").unwrap().suggested_template,
        "translate_review"
    );

    let response = orchestrator
        .collaborate(PlanRequest::new("Translate this letter").with_template("translate_review"))
        .await
        .unwrap();
    assert_eq!(response.completed, vec!["translation", "review"]);
    assert_eq!(response.services_used, vec!["translator", "reviewer"]);
    assert!(client.invocations()[0]
        .prompt
        .starts_with("You are a professional translator."));
}
