pub mod aggregator;
pub mod decomposer;
pub mod graph;
pub mod orchestrator;
pub mod retry;
pub mod store;
pub mod templates;

pub use aggregator::{aggregate, overall_status, CollaborationResponse, TaskOutcome};
pub use decomposer::TaskDecomposer;
pub use graph::{ExecutionReport, Executor, ExecutorConfig};
pub use orchestrator::{
    Orchestrator, PlanRequest, PlanSummary, TemplateListing, TemplateSuggestion,
};
pub use retry::RetryPolicy;
pub use store::{Claim, PlanListing, PlanStore};
pub use templates::{Complexity, TemplateDetail, TemplateRegistry, WorkflowTemplate};
