use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use weave_core::config::EngineConfig;
use weave_core::error::{ErrorCode, WeaveError};
use weave_core::event::{EngineEvent, EventBus};
use weave_core::traits::ServiceClient;
use weave_core::types::{
    InvokeRequest, Plan, PlanContext, PlanId, PlanStatus, ServiceDescriptor, SkipReason,
    TaskNode, TaskResult, TaskStatus,
};
use weave_services::{select, ServiceRegistry};

use crate::aggregator::overall_status;
use crate::retry::RetryPolicy;

/// Engine-wide execution defaults. A plan's context may override the
/// timeout and the concurrency limit.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub task_timeout: Duration,
    /// `None` dispatches a whole wave at once.
    pub max_concurrency: Option<usize>,
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ExecutorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            max_concurrency: config.max_concurrency,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

/// Everything the executor knows once a plan has settled.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// The plan with final per-task statuses and assigned services.
    pub plan: Plan,
    /// One result per task, in `task_sequence` order.
    pub results: Vec<TaskResult>,
    pub elapsed: Duration,
    pub deadline_exceeded: bool,
}

impl ExecutionReport {
    pub fn status(&self) -> PlanStatus {
        self.plan.status
    }

    pub fn result(&self, task_id: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.task_id == task_id)
    }
}

/// A task that has been handed to a service and not yet settled.
struct InFlight {
    service: String,
    started_at: DateTime<Utc>,
    attempts: u32,
}

type InFlightMap = Mutex<HashMap<String, InFlight>>;

/// Wave-based plan scheduler.
///
/// Each wave dispatches every task whose dependencies have all succeeded,
/// bounded by the concurrency limit, and waits for the wave to settle before
/// recomputing readiness. A task never starts before its dependencies are
/// known to have succeeded.
pub struct Executor {
    registry: Arc<ServiceRegistry>,
    client: Arc<dyn ServiceClient>,
    config: ExecutorConfig,
    event_bus: Arc<EventBus>,
}

impl Executor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        client: Arc<dyn ServiceClient>,
        config: ExecutorConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            client,
            config,
            event_bus,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a plan to completion, or until its deadline.
    pub async fn execute(&self, mut plan: Plan) -> ExecutionReport {
        let start = Instant::now();
        let ctx = plan.context.clone();
        let task_timeout = ctx
            .task_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.task_timeout);
        let limit = ctx
            .max_concurrency
            .or(self.config.max_concurrency)
            .filter(|n| *n > 0);
        let deadline = deadline_instant(&ctx, start);

        plan.status = PlanStatus::Running;
        info!(
            plan_id = %plan.id,
            tasks = plan.tasks.len(),
            parallel_execution = ctx.parallel_execution,
            "Executing plan"
        );

        let mut results: HashMap<String, TaskResult> = HashMap::new();
        let mut deadline_exceeded = false;
        let mut wave = 0;

        loop {
            let ready: Vec<String> = plan
                .task_sequence
                .iter()
                .filter(|id| !results.contains_key(id.as_str()))
                .filter(|id| {
                    plan.tasks[id.as_str()].dependencies.iter().all(|d| {
                        results
                            .get(d)
                            .is_some_and(|r| r.status == TaskStatus::Succeeded)
                    })
                })
                .cloned()
                .collect();
            if ready.is_empty() {
                break;
            }

            wave += 1;
            for id in &ready {
                if let Some(node) = plan.tasks.get_mut(id) {
                    node.status = TaskStatus::Ready;
                }
            }
            info!(plan_id = %plan.id, wave, tasks = ready.len(), "Dispatching wave");
            self.event_bus.publish(EngineEvent::WaveStarted {
                plan_id: plan.id.clone(),
                wave,
                task_ids: ready.clone(),
            });

            // One snapshot per wave so every dispatch sees the same registry view.
            let snapshot = self.registry.snapshot();
            let in_flight: InFlightMap = Mutex::new(HashMap::new());
            let nodes: Vec<TaskNode> = ready.iter().map(|id| plan.tasks[id.as_str()].clone()).collect();

            let mut settled: Vec<TaskResult> = Vec::with_capacity(ready.len());
            {
                let width = limit.unwrap_or(ready.len()).max(1);
                let mut stream = futures::stream::iter(nodes.into_iter().map(|node| {
                    self.run_task(&plan.id, node, &ctx, &snapshot, task_timeout, &in_flight)
                }))
                .buffer_unordered(width);

                loop {
                    tokio::select! {
                        next = stream.next() => match next {
                            Some(result) => {
                                self.finish_task(&plan.id, &result);
                                settled.push(result);
                            }
                            None => break,
                        },
                        _ = expire(deadline) => {
                            deadline_exceeded = true;
                            break;
                        }
                    }
                }
            }

            let failed: Vec<String> = settled
                .iter()
                .filter(|r| r.status == TaskStatus::Failed)
                .map(|r| r.task_id.clone())
                .collect();
            for result in settled {
                results.insert(result.task_id.clone(), result);
            }

            if deadline_exceeded {
                warn!(plan_id = %plan.id, wave, "Plan deadline exceeded");
                let in_flight = in_flight.into_inner().unwrap_or_else(PoisonError::into_inner);
                for id in &ready {
                    if results.contains_key(id) {
                        continue;
                    }
                    let result = match in_flight.get(id) {
                        Some(running) => TaskResult::failed(
                            id.clone(),
                            Some(running.service.clone()),
                            ErrorCode::DeadlineExceeded,
                            WeaveError::DeadlineExceeded.to_string(),
                            running.started_at,
                            running.attempts,
                        ),
                        None => TaskResult::skipped(
                            id.clone(),
                            SkipReason::DeadlineExceeded,
                            "plan deadline passed before dispatch",
                        ),
                    };
                    self.finish_task(&plan.id, &result);
                    results.insert(id.clone(), result);
                }
                self.skip_remaining(
                    &plan,
                    &mut results,
                    SkipReason::DeadlineExceeded,
                    "plan deadline passed before dispatch",
                );
                break;
            }

            for id in &failed {
                for dependent in plan.transitive_dependents(id) {
                    if results.contains_key(&dependent) {
                        continue;
                    }
                    debug!(plan_id = %plan.id, task_id = %dependent, upstream = %id, "Skipping dependent of failed task");
                    let result = TaskResult::skipped(
                        dependent.clone(),
                        SkipReason::UpstreamFailure,
                        format!("upstream task '{}' failed", id),
                    );
                    self.finish_task(&plan.id, &result);
                    results.insert(dependent, result);
                }
            }

            if !failed.is_empty() && !ctx.parallel_execution {
                warn!(plan_id = %plan.id, failed = ?failed, "Strict mode, aborting remaining tasks");
                let message = format!("plan aborted after task '{}' failed", failed[0]);
                self.skip_remaining(&plan, &mut results, SkipReason::PlanAborted, &message);
                break;
            }
        }

        let ordered: Vec<TaskResult> = plan
            .task_sequence
            .iter()
            .filter_map(|id| results.remove(id))
            .collect();
        for result in &ordered {
            if let Some(node) = plan.tasks.get_mut(&result.task_id) {
                node.status = result.status;
                node.assigned_service = result.service.clone();
            }
        }

        plan.status = overall_status(&ordered);
        let elapsed = start.elapsed();
        info!(
            plan_id = %plan.id,
            status = %plan.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Plan finished"
        );
        self.event_bus.publish(EngineEvent::PlanFinished {
            plan_id: plan.id.clone(),
            status: plan.status,
            elapsed_ms: elapsed.as_millis() as u64,
        });

        ExecutionReport {
            plan,
            results: ordered,
            elapsed,
            deadline_exceeded,
        }
    }

    /// Select a service for one task and invoke it under the retry policy.
    async fn run_task(
        &self,
        plan_id: &PlanId,
        node: TaskNode,
        ctx: &PlanContext,
        snapshot: &[ServiceDescriptor],
        timeout: Duration,
        in_flight: &InFlightMap,
    ) -> TaskResult {
        let started_at = Utc::now();
        let Some(service) = select(
            &node.spec.capabilities,
            &ctx.preferences,
            &ctx.exclusions,
            snapshot,
        ) else {
            let err = WeaveError::ServiceUnavailable {
                capabilities: node
                    .spec
                    .capabilities
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            };
            warn!(plan_id = %plan_id, task_id = %node.id, error = %err, "No service for task");
            return TaskResult::failed(node.id, None, err.code(), err.to_string(), started_at, 0);
        };

        debug!(plan_id = %plan_id, task_id = %node.id, service = %service.name, "Dispatching task");
        in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                node.id.clone(),
                InFlight {
                    service: service.name.clone(),
                    started_at,
                    attempts: 0,
                },
            );
        self.event_bus.publish(EngineEvent::TaskStarted {
            plan_id: plan_id.clone(),
            task_id: node.id.clone(),
            service: service.name.clone(),
        });

        let request = InvokeRequest {
            plan_id: plan_id.to_string(),
            task_id: node.id.clone(),
            task_type: node.spec.task_type.clone(),
            prompt: node.prompt.clone(),
            capabilities: node.spec.capabilities.iter().cloned().collect(),
        };
        let timeout_ms = timeout.as_millis() as u64;

        let (outcome, attempts) = self
            .config
            .retry
            .run(
                |attempt| {
                    if let Some(entry) = in_flight
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_mut(&node.id)
                    {
                        entry.attempts = attempt + 1;
                    }
                    let request = request.clone();
                    async move {
                        match tokio::time::timeout(timeout, self.client.invoke(service, request)).await {
                            Ok(result) => result,
                            Err(_) => Err(WeaveError::Timeout {
                                service: service.name.clone(),
                                timeout_ms,
                            }),
                        }
                    }
                },
                |attempt, backoff, e| {
                    self.event_bus.publish(EngineEvent::TaskRetrying {
                        plan_id: plan_id.clone(),
                        task_id: node.id.clone(),
                        attempt,
                        backoff_ms: backoff.as_millis() as u64,
                        error: e.to_string(),
                    });
                },
            )
            .await;

        match outcome {
            Ok(output) => TaskResult::succeeded(
                node.id.clone(),
                service.name.clone(),
                output,
                started_at,
                attempts,
            ),
            Err(e) => {
                warn!(
                    plan_id = %plan_id,
                    task_id = %node.id,
                    service = %service.name,
                    attempts,
                    error = %e,
                    "Task failed"
                );
                TaskResult::failed(
                    node.id.clone(),
                    Some(service.name.clone()),
                    e.code(),
                    e.to_string(),
                    started_at,
                    attempts,
                )
            }
        }
    }

    fn finish_task(&self, plan_id: &PlanId, result: &TaskResult) {
        debug!(plan_id = %plan_id, task_id = %result.task_id, status = %result.status, "Task settled");
        self.event_bus.publish(EngineEvent::TaskFinished {
            plan_id: plan_id.clone(),
            task_id: result.task_id.clone(),
            status: result.status,
        });
    }

    fn skip_remaining(
        &self,
        plan: &Plan,
        results: &mut HashMap<String, TaskResult>,
        reason: SkipReason,
        message: &str,
    ) {
        for id in &plan.task_sequence {
            if results.contains_key(id) {
                continue;
            }
            let result = TaskResult::skipped(id.clone(), reason, message);
            self.finish_task(&plan.id, &result);
            results.insert(id.clone(), result);
        }
    }
}

/// Earliest of the absolute and relative deadlines, as a tokio instant.
///
/// A deadline too far out to represent as an `Instant` is treated as unset.
fn deadline_instant(ctx: &PlanContext, start: Instant) -> Option<Instant> {
    let relative = ctx
        .deadline_secs
        .and_then(|s| start.checked_add(Duration::from_secs(s)));
    let absolute = ctx.deadline.and_then(|d| {
        let remaining = (d - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        start.checked_add(remaining)
    });
    match (relative, absolute) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}
