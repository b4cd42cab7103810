use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use weave_core::error::{Result, WeaveError};
use weave_core::event::{EngineEvent, EventBus};
use weave_core::types::{Plan, PlanContext, PlanId, PlanStatus, TaskNode, TaskType};

use crate::graph::dag;
use crate::store::PlanStore;
use crate::templates::{builtin_spec, tokenize, TemplateRegistry, WorkflowTemplate, GENERAL_TEMPLATE};

/// Words that mark a prompt as touching a domain.
const DOMAIN_MARKERS: &[(&str, &[&str])] = &[
    (
        "research",
        &["research", "investigate", "sources", "find", "study", "survey", "papers"],
    ),
    (
        "coding",
        &["code", "implement", "function", "program", "bug", "api", "script", "refactor"],
    ),
    (
        "creative",
        &["story", "poem", "creative", "fiction", "lyrics", "narrative"],
    ),
    (
        "reasoning",
        &["analyze", "analysis", "reason", "logic", "compare", "evaluate", "prove"],
    ),
];

/// Domains whose markers appear in the prompt, in marker-table order.
pub fn detect_domains(prompt: &str) -> Vec<&'static str> {
    let tokens = tokenize(prompt);
    DOMAIN_MARKERS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| tokens.contains(*w)))
        .map(|(domain, _)| *domain)
        .collect()
}

/// Turns a prompt into a stored `Plan`.
pub struct TaskDecomposer {
    templates: Arc<TemplateRegistry>,
    store: Arc<PlanStore>,
    event_bus: Arc<EventBus>,
}

impl TaskDecomposer {
    pub fn new(templates: Arc<TemplateRegistry>, store: Arc<PlanStore>, event_bus: Arc<EventBus>) -> Self {
        Self {
            templates,
            store,
            event_bus,
        }
    }

    /// Build a plan, persist it, and return it.
    ///
    /// A named template is instantiated as declared. Without one, a prompt
    /// touching two or more domains is matched to a template with
    /// `TemplateRegistry::suggest`; anything else becomes a single general task.
    ///
    /// # Errors
    /// `Validation` for an empty prompt, `TemplateNotFound` for an unknown
    /// template name.
    pub fn decompose(&self, prompt: &str, template: Option<&str>, context: PlanContext) -> Result<Plan> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(WeaveError::Validation("prompt must not be empty".into()));
        }
        if context.max_concurrency == Some(0) {
            return Err(WeaveError::Validation(
                "max_concurrency must be at least 1".into(),
            ));
        }

        let template = template.map(str::trim).filter(|t| !t.is_empty());
        let (template_name, nodes, estimate) = match template {
            Some(name) => {
                let t = self.templates.get(name)?;
                (t.name.clone(), instantiate(t, prompt), t.estimated_duration_secs)
            }
            None => {
                let domains = detect_domains(prompt);
                if domains.len() >= 2 {
                    let t = self.templates.get(self.templates.suggest(prompt))?;
                    debug!(?domains, template = %t.name, "Multi-domain prompt, using suggested template");
                    (t.name.clone(), instantiate(t, prompt), t.estimated_duration_secs)
                } else {
                    let general = self.templates.default_general();
                    (
                        GENERAL_TEMPLATE.to_string(),
                        vec![single_task(prompt, domains.first().copied())],
                        general.estimated_duration_secs,
                    )
                }
            }
        };

        let edges: Vec<(String, Vec<String>)> = nodes
            .iter()
            .map(|n| (n.id.clone(), n.dependencies.clone()))
            .collect();
        let task_sequence = dag::topological_order(&edges)?;

        let plan = Plan {
            id: PlanId::new(),
            prompt: prompt.to_string(),
            template: template_name,
            task_sequence,
            tasks: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            context,
            estimated_duration_secs: estimate,
            created_at: Utc::now(),
            status: PlanStatus::Created,
        };

        self.store.insert(plan.clone());
        info!(
            plan_id = %plan.id,
            template = %plan.template,
            tasks = plan.tasks.len(),
            "Plan created"
        );
        self.event_bus.publish(EngineEvent::PlanCreated {
            plan_id: plan.id.clone(),
            template: plan.template.clone(),
            tasks: plan.tasks.len(),
        });
        Ok(plan)
    }
}

fn instantiate(template: &WorkflowTemplate, prompt: &str) -> Vec<TaskNode> {
    template
        .tasks
        .iter()
        .map(|t| TaskNode::new(t.id.clone(), t.spec.clone(), prompt).with_dependencies(t.depends_on.clone()))
        .collect()
}

fn single_task(prompt: &str, domain: Option<&str>) -> TaskNode {
    let mut spec = builtin_spec(&TaskType::General);
    if let Some(domain) = domain {
        spec.capabilities.insert(domain.to_string());
    }
    TaskNode::new(GENERAL_TEMPLATE, spec, prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::types::PromptRule;

    fn decomposer() -> (TaskDecomposer, Arc<PlanStore>, Arc<EventBus>) {
        let store = Arc::new(PlanStore::new());
        let bus = Arc::new(EventBus::default());
        let d = TaskDecomposer::new(Arc::new(TemplateRegistry::new()), store.clone(), bus.clone());
        (d, store, bus)
    }

    #[test]
    fn test_named_template_is_instantiated() {
        let (d, store, _) = decomposer();
        let plan = d
            .decompose("Study CRDT adoption", Some("research_analysis"), PlanContext::default())
            .unwrap();

        assert_eq!(plan.template, "research_analysis");
        assert_eq!(plan.task_sequence, vec!["research", "reasoning", "summary"]);
        assert_eq!(plan.estimated_duration_secs, 120);
        assert_eq!(plan.tasks["summary"].dependencies, vec!["reasoning"]);
        assert!(plan.tasks["research"].prompt.ends_with("Study CRDT adoption"));
        assert!(plan.tasks["research"].prompt.starts_with("You are a research specialist"));
        assert!(plan.tasks.values().all(|t| t.assigned_service.is_none()));
        assert_eq!(store.get(plan.id.as_str()).unwrap().id, plan.id);
    }

    #[test]
    fn test_unknown_template_fails_without_storing() {
        let (d, store, _) = decomposer();
        let err = d
            .decompose("anything", Some("nonexistent"), PlanContext::default())
            .unwrap_err();
        assert!(matches!(err, WeaveError::TemplateNotFound(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_empty_prompt_is_rejected() {
        let (d, _, _) = decomposer();
        assert!(matches!(
            d.decompose("   ", None, PlanContext::default()),
            Err(WeaveError::Validation(_))
        ));
    }

    #[test]
    fn test_blank_template_name_means_auto() {
        let (d, _, _) = decomposer();
        let plan = d.decompose("hello there", Some(""), PlanContext::default()).unwrap();
        assert_eq!(plan.template, GENERAL_TEMPLATE);
    }

    #[test]
    fn test_single_domain_prompt_is_one_general_task() {
        let (d, _, _) = decomposer();
        let plan = d
            .decompose("Write a short poem about autumn", None, PlanContext::default())
            .unwrap();
        assert_eq!(plan.tasks.len(), 1);
        let task = &plan.tasks[GENERAL_TEMPLATE];
        assert_eq!(task.spec.task_type, TaskType::General);
        assert!(task.spec.capabilities.contains("general"));
        assert!(task.spec.capabilities.contains("creative"));
        assert!(matches!(task.spec.prompt_rule, PromptRule::RolePrefix { .. }));
    }

    #[test]
    fn test_multi_domain_prompt_uses_suggestion() {
        let (d, _, _) = decomposer();
        let plan = d
            .decompose(
                "Research existing libraries, then implement a Rust function and fix the bug",
                None,
                PlanContext::default(),
            )
            .unwrap();
        assert_eq!(plan.template, "code_development");
        assert_eq!(plan.tasks.len(), 4);
    }

    #[test]
    fn test_plan_ids_are_unique_and_event_is_published() {
        let (d, store, bus) = decomposer();
        let mut rx = bus.subscribe();
        let a = d.decompose("one", None, PlanContext::default()).unwrap();
        let b = d.decompose("two", None, PlanContext::default()).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::PlanCreated { tasks: 1, .. }
        ));
    }

    #[test]
    fn test_detect_domains() {
        assert_eq!(detect_domains("fix this bug"), vec!["coding"]);
        assert_eq!(
            detect_domains("investigate and analyze the code"),
            vec!["research", "coding", "reasoning"]
        );
        assert!(detect_domains("hello").is_empty());
    }
}
