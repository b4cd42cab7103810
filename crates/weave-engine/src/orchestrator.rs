use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use weave_core::config::AppConfig;
use weave_core::error::{Result, WeaveError};
use weave_core::event::EventBus;
use weave_core::traits::ServiceClient;
use weave_core::types::{Plan, PlanContext, PlanId};
use weave_services::{select, ServiceRegistry, Snapshot};

use crate::aggregator::CollaborationResponse;
use crate::decomposer::TaskDecomposer;
use crate::graph::{Executor, ExecutorConfig};
use crate::store::{Claim, PlanListing, PlanStore};
use crate::templates::{TemplateDetail, TemplateRegistry};

/// Body of a create-plan or collaborate request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanRequest {
    pub prompt: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub context: PlanContext,
}

impl PlanRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_context(mut self, context: PlanContext) -> Self {
        self.context = context;
        self
    }
}

/// Reply to a create-plan request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub id: PlanId,
    pub template: String,
    pub task_sequence: Vec<String>,
    /// Service the selector would pick right now, per task. Binding
    /// assignment happens at dispatch.
    pub service_allocation: BTreeMap<String, Option<String>>,
    pub estimated_duration: u64,
    pub parallel_execution: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateListing {
    pub templates: BTreeMap<String, String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSuggestion {
    pub suggested_template: String,
    pub template_info: TemplateDetail,
}

/// Entry point for every engine operation.
///
/// Owns the template catalogue, the plan store, the decomposer and the
/// executor. The service registry is shared with whoever runs its prober.
pub struct Orchestrator {
    templates: Arc<TemplateRegistry>,
    registry: Arc<ServiceRegistry>,
    store: Arc<PlanStore>,
    decomposer: TaskDecomposer,
    executor: Arc<Executor>,
    event_bus: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(
        templates: TemplateRegistry,
        registry: Arc<ServiceRegistry>,
        client: Arc<dyn ServiceClient>,
        config: ExecutorConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let templates = Arc::new(templates);
        let store = Arc::new(PlanStore::new());
        let decomposer = TaskDecomposer::new(templates.clone(), store.clone(), event_bus.clone());
        let executor = Arc::new(Executor::new(
            registry.clone(),
            client,
            config,
            event_bus.clone(),
        ));
        Self {
            templates,
            registry,
            store,
            decomposer,
            executor,
            event_bus,
        }
    }

    /// Wire everything from a loaded config.
    pub fn from_config(
        config: &AppConfig,
        client: Arc<dyn ServiceClient>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        let templates = TemplateRegistry::from_config(&config.templates)?;
        let registry = Arc::new(ServiceRegistry::from_config(
            config,
            client.clone(),
            event_bus.clone(),
        ));
        Ok(Self::new(
            templates,
            registry,
            client,
            ExecutorConfig::from(&config.engine),
            event_bus,
        ))
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Decompose a request into a stored plan and preview its allocation.
    pub fn create_plan(&self, request: PlanRequest) -> Result<PlanSummary> {
        let plan = self.decomposer.decompose(
            &request.prompt,
            request.template.as_deref(),
            request.context,
        )?;
        Ok(self.summarize(&plan))
    }

    fn summarize(&self, plan: &Plan) -> PlanSummary {
        let snapshot = self.registry.snapshot();
        let service_allocation = plan
            .task_sequence
            .iter()
            .map(|id| {
                let chosen = plan.tasks.get(id).and_then(|t| {
                    select(
                        &t.spec.capabilities,
                        &plan.context.preferences,
                        &plan.context.exclusions,
                        &snapshot,
                    )
                });
                (id.clone(), chosen.map(|s| s.name.clone()))
            })
            .collect();
        PlanSummary {
            id: plan.id.clone(),
            template: plan.template.clone(),
            task_sequence: plan.task_sequence.clone(),
            service_allocation,
            estimated_duration: plan.estimated_duration_secs,
            parallel_execution: plan.context.parallel_execution,
        }
    }

    /// Execute a stored plan at most once.
    ///
    /// The first caller runs the plan. Callers arriving while it runs get
    /// `PlanAlreadyRunning`; callers arriving after it finished get the cached
    /// response. Execution runs on its own task, so it completes and is cached
    /// even if this caller goes away.
    pub async fn execute_plan(&self, id: &str) -> Result<Arc<CollaborationResponse>> {
        let plan = match self.store.claim(id)? {
            Claim::Finished(response) => return Ok(response),
            Claim::Running => return Err(WeaveError::PlanAlreadyRunning(id.to_string())),
            Claim::Acquired(plan) => plan,
        };

        let executor = self.executor.clone();
        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            let report = executor.execute(plan).await;
            let response = CollaborationResponse::from(&report);
            store.complete(report.plan, response)
        });

        match handle.await {
            Ok(response) => {
                info!(plan_id = %id, status = %response.status, "Collaboration finished");
                Ok(response)
            }
            Err(e) => {
                error!(plan_id = %id, error = %e, "Plan execution aborted");
                self.store.release(id);
                Err(WeaveError::Internal(format!("plan execution aborted: {}", e)))
            }
        }
    }

    /// Plan and execute in one call.
    pub async fn collaborate(&self, request: PlanRequest) -> Result<Arc<CollaborationResponse>> {
        let summary = self.create_plan(request)?;
        self.execute_plan(summary.id.as_str()).await
    }

    pub fn templates(&self) -> TemplateListing {
        let templates = self.templates.list();
        TemplateListing {
            count: templates.len(),
            templates,
        }
    }

    pub fn template(&self, name: &str) -> Result<TemplateDetail> {
        Ok(self.templates.get(name)?.detail())
    }

    pub fn suggest(&self, prompt: &str) -> Result<TemplateSuggestion> {
        if prompt.trim().is_empty() {
            return Err(WeaveError::Validation("prompt must not be empty".into()));
        }
        let name = self.templates.suggest(prompt);
        Ok(TemplateSuggestion {
            suggested_template: name.to_string(),
            template_info: self.templates.get(name)?.detail(),
        })
    }

    pub fn plan(&self, id: &str) -> Result<Plan> {
        self.store.get(id)
    }

    pub fn plans(&self) -> Vec<PlanListing> {
        self.store.list()
    }

    pub fn services(&self) -> Snapshot {
        self.registry.snapshot()
    }
}
