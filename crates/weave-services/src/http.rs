use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use tracing::debug;

use weave_core::config::RegistryConfig;
use weave_core::error::{Result, WeaveError};
use weave_core::traits::ServiceClient;
use weave_core::types::{InvokeRequest, ServiceDescriptor, ServiceOutput};

/// JSON-over-HTTP service client.
///
/// `invoke` POSTs the request to `{endpoint}{run_path}` and expects a
/// `ServiceOutput` body; `probe` GETs `{endpoint}{health_path}` and treats
/// any 2xx as healthy.
pub struct HttpServiceClient {
    http: Client,
    run_path: String,
    health_path: String,
    connect_timeout: Duration,
}

impl HttpServiceClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let connect_timeout = Duration::from_secs(config.probe_timeout_secs);
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| WeaveError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            run_path: config.run_path.clone(),
            health_path: config.health_path.clone(),
            connect_timeout,
        })
    }

    /// The client only sets a connect timeout; the per-task timeout is
    /// enforced by the executor, so a reqwest timeout is a connect failure.
    fn classify(&self, service: &str, e: reqwest::Error) -> WeaveError {
        if e.is_timeout() {
            connect_timed_out(service, self.connect_timeout)
        } else if e.is_decode() {
            WeaveError::MalformedResponse {
                service: service.to_string(),
                message: e.to_string(),
            }
        } else {
            WeaveError::Connection {
                service: service.to_string(),
                message: e.to_string(),
            }
        }
    }
}

fn connect_timed_out(service: &str, timeout: Duration) -> WeaveError {
    WeaveError::Connection {
        service: service.to_string(),
        message: format!("connect timed out after {}ms", timeout.as_millis()),
    }
}

fn join_url(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// 429 and 5xx are worth retrying; other non-2xx statuses are not.
fn status_error(service: &str, status: StatusCode, body: &str) -> WeaveError {
    let message = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body)
    };
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        WeaveError::Connection {
            service: service.to_string(),
            message,
        }
    } else {
        WeaveError::Provider {
            service: service.to_string(),
            message,
        }
    }
}

impl ServiceClient for HttpServiceClient {
    fn invoke(
        &self,
        service: &ServiceDescriptor,
        request: InvokeRequest,
    ) -> BoxFuture<'_, Result<ServiceOutput>> {
        let name = service.name.clone();
        let url = join_url(&service.endpoint, &self.run_path);

        Box::pin(async move {
            debug!(service = %name, %url, task_id = %request.task_id, "Invoking service");
            let resp = self
                .http
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| self.classify(&name, e))?;

            let status = resp.status();
            let body = resp.text().await.map_err(|e| self.classify(&name, e))?;
            if !status.is_success() {
                return Err(status_error(&name, status, &body));
            }

            serde_json::from_str::<ServiceOutput>(&body).map_err(|e| {
                WeaveError::MalformedResponse {
                    service: name.clone(),
                    message: e.to_string(),
                }
            })
        })
    }

    fn probe(&self, service: &ServiceDescriptor) -> BoxFuture<'_, Result<()>> {
        let name = service.name.clone();
        let url = join_url(&service.endpoint, &self.health_path);

        Box::pin(async move {
            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| self.classify(&name, e))?;
            let status = resp.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(status_error(&name, status, ""))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use weave_core::types::TaskType;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn request() -> InvokeRequest {
        InvokeRequest {
            plan_id: "p1".into(),
            task_id: "research".into(),
            task_type: TaskType::Research,
            prompt: "Find sources".into(),
            capabilities: vec!["research".into()],
        }
    }

    fn client() -> HttpServiceClient {
        HttpServiceClient::new(&RegistryConfig::default()).unwrap()
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://a:1/", "/run"), "http://a:1/run");
        assert_eq!(join_url("http://a:1", "health"), "http://a:1/health");
    }

    #[test]
    fn test_connect_timeout_is_not_a_task_timeout() {
        let err = connect_timed_out("search", Duration::from_secs(5));
        assert!(matches!(
            err,
            WeaveError::Connection { ref message, .. } if message == "connect timed out after 5000ms"
        ));
        assert!(err.is_transient());
        assert_ne!(err.code(), weave_core::error::ErrorCode::ExecutionTimeout);
    }

    #[test]
    fn test_status_error_classification() {
        assert!(status_error("s", StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(status_error("s", StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(!status_error("s", StatusCode::BAD_REQUEST, "bad").is_transient());
    }

    #[tokio::test]
    async fn test_invoke_decodes_output() {
        let app = Router::new().route(
            "/run",
            post(|Json(req): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "content": format!("done: {}", req["task_id"].as_str().unwrap_or("")),
                    "confidence": 0.9
                }))
            }),
        );
        let base = spawn(app).await;
        let svc = ServiceDescriptor::new("search", base);

        let out = client().invoke(&svc, request()).await.unwrap();
        assert_eq!(out.content, "done: research");
        assert_eq!(out.confidence, Some(0.9));
    }

    #[tokio::test]
    async fn test_invoke_malformed_body_is_not_transient() {
        let app = Router::new().route("/run", post(|| async { "not json" }));
        let base = spawn(app).await;
        let svc = ServiceDescriptor::new("search", base);

        let err = client().invoke(&svc, request()).await.unwrap_err();
        assert!(matches!(err, WeaveError::MalformedResponse { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_invoke_server_error_is_transient() {
        let app = Router::new().route(
            "/run",
            post(|| async { (AxumStatus::BAD_GATEWAY, "upstream down") }),
        );
        let base = spawn(app).await;
        let svc = ServiceDescriptor::new("search", base);

        let err = client().invoke(&svc, request()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_probe() {
        let app = Router::new().route("/health", get(|| async { "ok" }));
        let base = spawn(app).await;
        let healthy = ServiceDescriptor::new("up", base);
        assert!(client().probe(&healthy).await.is_ok());

        let app = Router::new().route(
            "/health",
            get(|| async { AxumStatus::SERVICE_UNAVAILABLE }),
        );
        let base = spawn(app).await;
        let unhealthy = ServiceDescriptor::new("down", base);
        assert!(client().probe(&unhealthy).await.is_err());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let svc = ServiceDescriptor::new("gone", format!("http://{}", addr));

        let err = client().invoke(&svc, request()).await.unwrap_err();
        assert!(matches!(err, WeaveError::Connection { .. }));
    }
}
