use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;

/// Unique plan identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub String);

impl PlanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Abstract capability tag a service declares it can satisfy.
pub type Capability = String;

/// Kind of work a task performs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Research,
    Coding,
    Creative,
    Reasoning,
    General,
    Custom(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Research => "research",
            Self::Coding => "coding",
            Self::Creative => "creative",
            Self::Reasoning => "reasoning",
            Self::General => "general",
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "research" => Self::Research,
            "coding" => Self::Coding,
            "creative" => Self::Creative,
            "reasoning" => Self::Reasoning,
            "general" => Self::General,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task's prompt is derived from the parent request prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptRule {
    /// Pass the parent prompt through unchanged.
    Verbatim,
    /// Prefix a role description to the parent prompt.
    RolePrefix { role: String },
}

impl PromptRule {
    pub fn render(&self, prompt: &str) -> String {
        match self {
            Self::Verbatim => prompt.to_string(),
            Self::RolePrefix { role } => format!("{}\n\nTask: {}", role, prompt),
        }
    }
}

/// What a task is and what it needs from a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_type: TaskType,
    pub capabilities: BTreeSet<Capability>,
    pub prompt_rule: PromptRule,
}

impl TaskSpec {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            capabilities: BTreeSet::new(),
            prompt_rule: PromptRule::Verbatim,
        }
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.prompt_rule = PromptRule::RolePrefix { role: role.into() };
        self
    }
}

/// Per-task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Why a task was skipped without being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UpstreamFailure,
    PlanAborted,
    DeadlineExceeded,
}

impl SkipReason {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UpstreamFailure => ErrorCode::UpstreamFailure,
            Self::PlanAborted => ErrorCode::PlanAborted,
            Self::DeadlineExceeded => ErrorCode::DeadlineExceeded,
        }
    }
}

/// One task instance inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub spec: TaskSpec,
    /// Sub-prompt generated from the parent prompt.
    pub prompt: String,
    pub dependencies: Vec<String>,
    /// Filled in at dispatch time.
    #[serde(default)]
    pub assigned_service: Option<String>,
    pub status: TaskStatus,
}

impl TaskNode {
    pub fn new(id: impl Into<String>, spec: TaskSpec, parent_prompt: &str) -> Self {
        let prompt = spec.prompt_rule.render(parent_prompt);
        Self {
            id: id.into(),
            spec,
            prompt,
            dependencies: vec![],
            assigned_service: None,
            status: TaskStatus::Pending,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }
}

fn default_parallel_execution() -> bool {
    true
}

/// Caller-supplied execution context for a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanContext {
    /// Service names to use first when they qualify.
    #[serde(default)]
    pub preferences: Vec<String>,
    /// Service names that must never be used.
    #[serde(default)]
    pub exclusions: Vec<String>,
    /// Best-effort mode: a failure prunes only its own subtree.
    /// When false, the first failure aborts every task not yet dispatched.
    #[serde(default = "default_parallel_execution")]
    pub parallel_execution: bool,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
    /// Absolute deadline for the whole plan.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    /// Deadline relative to execution start.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

impl Default for PlanContext {
    fn default() -> Self {
        Self {
            preferences: vec![],
            exclusions: vec![],
            parallel_execution: default_parallel_execution(),
            max_concurrency: None,
            task_timeout_secs: None,
            deadline: None,
            deadline_secs: None,
        }
    }
}

/// Overall plan lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Created,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl PlanStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Failed
        )
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A DAG of tasks derived from one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub prompt: String,
    /// Template the plan was instantiated from.
    pub template: String,
    /// Topological listing of task ids.
    pub task_sequence: Vec<String>,
    pub tasks: HashMap<String, TaskNode>,
    pub context: PlanContext,
    pub estimated_duration_secs: u64,
    pub created_at: DateTime<Utc>,
    pub status: PlanStatus,
}

impl Plan {
    pub fn task(&self, id: &str) -> Option<&TaskNode> {
        self.tasks.get(id)
    }

    /// Tasks with no dependencies, in sequence order.
    pub fn roots(&self) -> Vec<&str> {
        self.task_sequence
            .iter()
            .filter(|id| {
                self.tasks
                    .get(id.as_str())
                    .is_some_and(|t| t.dependencies.is_empty())
            })
            .map(|id| id.as_str())
            .collect()
    }

    /// Tasks that list `id` as a direct dependency, in sequence order.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.task_sequence
            .iter()
            .filter(|tid| {
                self.tasks
                    .get(tid.as_str())
                    .is_some_and(|t| t.dependencies.iter().any(|d| d == id))
            })
            .map(|tid| tid.as_str())
            .collect()
    }

    /// Every task reachable from `id` through dependent edges, in sequence order.
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for dep in self.dependents(&current) {
                if seen.insert(dep.to_string()) {
                    queue.push_back(dep.to_string());
                }
            }
        }
        self.task_sequence
            .iter()
            .filter(|tid| seen.contains(tid.as_str()))
            .cloned()
            .collect()
    }
}

/// Provider health as last observed by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// An external capability provider reachable by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub endpoint: String,
    pub capabilities: BTreeSet<Capability>,
    pub priority: i32,
    pub status: HealthStatus,
    #[serde(default)]
    pub last_probed: Option<DateTime<Utc>>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            capabilities: BTreeSet::new(),
            priority: 0,
            status: HealthStatus::Unknown,
            last_probed: None,
        }
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: HealthStatus) -> Self {
        self.status = status;
        self
    }

    /// Number of required capabilities this service declares.
    pub fn overlap(&self, required: &BTreeSet<Capability>) -> usize {
        required
            .iter()
            .filter(|c| self.capabilities.contains(*c))
            .count()
    }
}

/// Generic "run this sub-prompt" call sent to a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub plan_id: String,
    pub task_id: String,
    pub task_type: TaskType,
    pub prompt: String,
    pub capabilities: Vec<Capability>,
}

/// Generic content payload returned by a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOutput {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl ServiceOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            confidence: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Error attached to a failed or skipped task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: ErrorCode,
    pub message: String,
}

/// Outcome of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub output: Option<ServiceOutput>,
    #[serde(default)]
    pub error: Option<TaskError>,
    #[serde(default)]
    pub skip_reason: Option<SkipReason>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

impl TaskResult {
    pub fn succeeded(
        task_id: impl Into<String>,
        service: impl Into<String>,
        output: ServiceOutput,
        started_at: DateTime<Utc>,
        attempts: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Succeeded,
            output: Some(output),
            error: None,
            skip_reason: None,
            service: Some(service.into()),
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            attempts,
        }
    }

    pub fn failed(
        task_id: impl Into<String>,
        service: Option<String>,
        code: ErrorCode,
        message: impl Into<String>,
        started_at: DateTime<Utc>,
        attempts: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            output: None,
            error: Some(TaskError {
                code,
                message: message.into(),
            }),
            skip_reason: None,
            service,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            attempts,
        }
    }

    pub fn skipped(task_id: impl Into<String>, reason: SkipReason, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Skipped,
            output: None,
            error: Some(TaskError {
                code: reason.code(),
                message: message.into(),
            }),
            skip_reason: Some(reason),
            service: None,
            started_at: None,
            finished_at: None,
            attempts: 0,
        }
    }
}
