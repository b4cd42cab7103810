//! Test doubles shared across Weave crates.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use weave_core::error::{Result, WeaveError};
use weave_core::traits::ServiceClient;
use weave_core::types::{HealthStatus, InvokeRequest, ServiceDescriptor, ServiceOutput};

/// One scripted reaction to an `invoke` call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Resolve immediately with this output.
    Reply(ServiceOutput),
    /// Never resolve; the caller's timeout decides.
    Timeout,
    /// Transient connection failure.
    ConnectionError,
    /// Non-transient undecodable response.
    Malformed,
    /// Non-transient rejection with a message.
    Reject(String),
    /// Sleep, then resolve with this output.
    Delay(Duration, ServiceOutput),
}

/// Scripted probe behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Up,
    Down,
    Hang,
}

/// A recorded `invoke` call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub service: String,
    pub task_id: String,
    pub prompt: String,
    pub at: tokio::time::Instant,
}

/// In-memory `ServiceClient` driven by per-task or per-service scripts.
///
/// Task scripts take precedence over service scripts. When neither has a
/// step left the call succeeds with `"<task> by <service>"`.
#[derive(Default)]
pub struct ScriptedClient {
    task_scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    service_scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    health: Mutex<HashMap<String, Health>>,
    invocations: Mutex<Vec<Invocation>>,
    probes: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_task(&self, task_id: &str, steps: Vec<Step>) {
        self.task_scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), steps.into());
    }

    pub fn script_service(&self, service: &str, steps: Vec<Step>) {
        self.service_scripts
            .lock()
            .unwrap()
            .insert(service.to_string(), steps.into());
    }

    pub fn set_health(&self, service: &str, health: Health) {
        self.health
            .lock()
            .unwrap()
            .insert(service.to_string(), health);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Number of `invoke` calls made for a task.
    pub fn calls_for_task(&self, task_id: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.task_id == task_id)
            .count()
    }

    pub fn probe_count(&self, service: &str) -> usize {
        self.probes
            .lock()
            .unwrap()
            .get(service)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of concurrent `invoke` calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_step(&self, service: &str, task_id: &str) -> Option<Step> {
        if let Some(step) = self
            .task_scripts
            .lock()
            .unwrap()
            .get_mut(task_id)
            .and_then(|q| q.pop_front())
        {
            return Some(step);
        }
        self.service_scripts
            .lock()
            .unwrap()
            .get_mut(service)
            .and_then(|q| q.pop_front())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ServiceClient for ScriptedClient {
    fn invoke(
        &self,
        service: &ServiceDescriptor,
        request: InvokeRequest,
    ) -> BoxFuture<'_, Result<ServiceOutput>> {
        let name = service.name.clone();
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            self.invocations.lock().unwrap().push(Invocation {
                service: name.clone(),
                task_id: request.task_id.clone(),
                prompt: request.prompt.clone(),
                at: tokio::time::Instant::now(),
            });

            // Yield so siblings dispatched in the same wave overlap.
            tokio::task::yield_now().await;

            match self.next_step(&name, &request.task_id) {
                None => Ok(ServiceOutput::text(format!("{} by {}", request.task_id, name))),
                Some(Step::Reply(out)) => Ok(out),
                Some(Step::Timeout) => futures::future::pending().await,
                Some(Step::ConnectionError) => Err(WeaveError::Connection {
                    service: name,
                    message: "connection reset".into(),
                }),
                Some(Step::Malformed) => Err(WeaveError::MalformedResponse {
                    service: name,
                    message: "expected value at line 1 column 1".into(),
                }),
                Some(Step::Reject(message)) => Err(WeaveError::Provider {
                    service: name,
                    message,
                }),
                Some(Step::Delay(d, out)) => {
                    tokio::time::sleep(d).await;
                    Ok(out)
                }
            }
        })
    }

    fn probe(&self, service: &ServiceDescriptor) -> BoxFuture<'_, Result<()>> {
        let name = service.name.clone();
        Box::pin(async move {
            *self.probes.lock().unwrap().entry(name.clone()).or_insert(0) += 1;
            let health = self
                .health
                .lock()
                .unwrap()
                .get(&name)
                .copied()
                .unwrap_or(Health::Up);
            match health {
                Health::Up => Ok(()),
                Health::Down => Err(WeaveError::Connection {
                    service: name,
                    message: "connection refused".into(),
                }),
                Health::Hang => futures::future::pending().await,
            }
        })
    }
}

/// Online descriptor with a mock endpoint.
pub fn service(name: &str, capabilities: &[&str], priority: i32) -> ServiceDescriptor {
    ServiceDescriptor::new(name, format!("mock://{}", name))
        .with_capabilities(capabilities.iter().copied())
        .with_priority(priority)
        .with_status(HealthStatus::Online)
}

/// One online service per built-in capability family.
pub fn standard_services() -> Vec<ServiceDescriptor> {
    vec![
        service("search-index", &["research", "search"], 5),
        service("reasoner", &["reasoning", "review"], 5),
        service("code-model", &["coding"], 5),
        service(
            "writer",
            &["writing", "summarization", "documentation", "creative"],
            3,
        ),
        service("generalist", &["general"], 1),
    ]
}
