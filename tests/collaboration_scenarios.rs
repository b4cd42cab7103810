use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use weave_core::config::{TemplateConfig, TemplateTaskConfig};
use weave_core::error::{ErrorCode, WeaveError};
use weave_core::event::EventBus;
use weave_core::types::{
    HealthStatus, PlanContext, PlanStatus, ServiceOutput, SkipReason, TaskStatus,
};
use weave_engine::graph::is_topological;
use weave_engine::{ExecutorConfig, Orchestrator, PlanRequest, TemplateRegistry};
use weave_services::{select, ServiceRegistry};
use weave_test_utils::{service, standard_services, ScriptedClient, Step};

fn orchestrator_with(templates: TemplateRegistry) -> (Orchestrator, Arc<ScriptedClient>) {
    let client = Arc::new(ScriptedClient::new());
    let bus = Arc::new(EventBus::default());
    let registry = Arc::new(ServiceRegistry::new(
        client.clone(),
        Default::default(),
        bus.clone(),
    ));
    for svc in standard_services() {
        registry.register(svc);
    }
    let orchestrator = Orchestrator::new(
        templates,
        registry,
        client.clone(),
        ExecutorConfig::default(),
        bus,
    );
    (orchestrator, client)
}

fn orchestrator() -> (Orchestrator, Arc<ScriptedClient>) {
    orchestrator_with(TemplateRegistry::new())
}

fn general_task(id: &str, depends_on: &[&str]) -> TemplateTaskConfig {
    TemplateTaskConfig {
        id: Some(id.to_string()),
        task_type: id.to_string(),
        capabilities: vec!["general".into()],
        role: None,
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
    }
}

/// `a -> b` and `c -> d`, two independent chains.
fn two_chains() -> TemplateRegistry {
    TemplateRegistry::from_config(&[TemplateConfig {
        name: "two_chains".into(),
        description: "Two independent chains".into(),
        complexity: "low".into(),
        estimated_duration_secs: 30,
        keywords: vec![],
        tasks: vec![
            general_task("a", &[]),
            general_task("b", &["a"]),
            general_task("c", &[]),
            general_task("d", &["c"]),
        ],
    }])
    .unwrap()
}

fn fan_out(width: usize) -> TemplateRegistry {
    let ids: Vec<String> = (0..width).map(|i| format!("w{}", i)).collect();
    TemplateRegistry::from_config(&[TemplateConfig {
        name: "fan_out".into(),
        description: "Independent workers".into(),
        complexity: "low".into(),
        estimated_duration_secs: 30,
        keywords: vec![],
        tasks: ids.iter().map(|id| general_task(id, &[])).collect(),
    }])
    .unwrap()
}

#[tokio::test]
async fn test_research_analysis_completes() {
    let (orch, client) = orchestrator();
    let response = orch
        .collaborate(
            PlanRequest::new("Research the benefits of renewable energy")
                .with_template("research_analysis"),
        )
        .await
        .unwrap();

    assert_eq!(response.status, PlanStatus::Completed);
    assert_eq!(response.results.len(), 3);
    assert!(response
        .results
        .values()
        .all(|r| r.status == TaskStatus::Succeeded));
    assert_eq!(
        response.summary,
        "Collaboration completed successfully with 3 tasks"
    );
    assert_eq!(response.services_used, vec!["search-index", "reasoner", "writer"]);

    let order: Vec<String> = client.invocations().into_iter().map(|i| i.task_id).collect();
    assert_eq!(order, vec!["research", "reasoning", "summary"]);
}

#[tokio::test]
async fn test_offline_coder_prunes_its_subtree() {
    let (orch, client) = orchestrator();
    orch.registry().set_status("code-model", HealthStatus::Offline);

    let response = orch
        .collaborate(PlanRequest::new("Build a JSON parser").with_template("code_development"))
        .await
        .unwrap();

    assert_eq!(response.status, PlanStatus::CompletedWithErrors);
    assert_eq!(response.results["research"].status, TaskStatus::Succeeded);

    let coding = &response.results["coding"];
    assert_eq!(coding.status, TaskStatus::Failed);
    assert_eq!(coding.error.as_ref().unwrap().code, ErrorCode::ServiceUnavailable);
    assert_eq!(coding.attempts, 0);

    for id in ["review", "documentation"] {
        assert_eq!(response.results[id].status, TaskStatus::Skipped);
        assert_eq!(response.results[id].skip_reason, Some(SkipReason::UpstreamFailure));
        assert_eq!(client.calls_for_task(id), 0);
    }
    assert_eq!(response.failed, vec!["coding"]);
    assert_eq!(response.skipped, vec!["review", "documentation"]);
    assert!(!response.services_used.contains(&"code-model".to_string()));
}

#[tokio::test]
async fn test_unknown_plan_id() {
    let (orch, client) = orchestrator();
    let err = orch.execute_plan("no-such-plan").await.unwrap_err();
    assert!(matches!(err, WeaveError::PlanNotFound(ref id) if id == "no-such-plan"));
    assert!(orch.plans().is_empty());
    assert!(client.invocations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_then_success() {
    let (orch, client) = orchestrator();
    client.script_task("research", vec![Step::Timeout, Step::Timeout]);

    let response = orch
        .collaborate(PlanRequest::new("Study CRDTs").with_template("research_analysis"))
        .await
        .unwrap();

    assert_eq!(response.status, PlanStatus::Completed);
    assert_eq!(response.results["research"].attempts, 3);
    assert_eq!(client.calls_for_task("research"), 3);
    assert_eq!(response.results["reasoning"].attempts, 1);
}

#[tokio::test]
async fn test_failure_isolation_between_chains() {
    let (orch, client) = orchestrator_with(two_chains());
    client.script_task("a", vec![Step::Reject("refused".into())]);

    let response = orch
        .collaborate(PlanRequest::new("do the work").with_template("two_chains"))
        .await
        .unwrap();

    assert_eq!(response.status, PlanStatus::CompletedWithErrors);
    assert_eq!(response.results["a"].status, TaskStatus::Failed);
    assert_eq!(response.results["b"].skip_reason, Some(SkipReason::UpstreamFailure));
    assert_eq!(response.results["c"].status, TaskStatus::Succeeded);
    assert_eq!(response.results["d"].status, TaskStatus::Succeeded);
    assert_eq!(client.calls_for_task("a"), 1);
}

#[tokio::test]
async fn test_strict_mode_aborts_undispatched_tasks() {
    let (orch, client) = orchestrator_with(two_chains());
    client.script_task("a", vec![Step::Reject("refused".into())]);

    let context = PlanContext {
        parallel_execution: false,
        ..PlanContext::default()
    };
    let response = orch
        .collaborate(
            PlanRequest::new("do the work")
                .with_template("two_chains")
                .with_context(context),
        )
        .await
        .unwrap();

    // `c` shares the first wave with `a`, so it still runs.
    assert_eq!(response.results["c"].status, TaskStatus::Succeeded);
    assert_eq!(response.results["b"].skip_reason, Some(SkipReason::UpstreamFailure));
    assert_eq!(response.results["d"].skip_reason, Some(SkipReason::PlanAborted));
    assert_eq!(client.calls_for_task("d"), 0);
    assert_eq!(response.status, PlanStatus::CompletedWithErrors);
}

#[tokio::test]
async fn test_plan_round_trip() {
    let (orch, _) = orchestrator();
    let summary = orch
        .create_plan(PlanRequest::new("Write a poem").with_template("creative_writing"))
        .unwrap();

    let plan = orch.plan(summary.id.as_str()).unwrap();
    assert_eq!(plan.status, PlanStatus::Created);
    assert_eq!(plan.task_sequence, summary.task_sequence);

    let ids: HashSet<&str> = plan.tasks.keys().map(String::as_str).collect();
    let sequence: HashSet<&str> = summary.task_sequence.iter().map(String::as_str).collect();
    assert_eq!(ids, sequence);

    let json = serde_json::to_string(&plan).unwrap();
    let back: weave_core::types::Plan = serde_json::from_str(&json).unwrap();
    assert_eq!(back.id, plan.id);
    assert_eq!(back.task_sequence, plan.task_sequence);
}

#[tokio::test]
async fn test_executed_results_cover_every_planned_task() {
    let (orch, _) = orchestrator();
    for name in orch.templates().templates.keys() {
        let summary = orch
            .create_plan(PlanRequest::new("Plan something useful").with_template(name.clone()))
            .unwrap();
        let planned: HashSet<String> = orch
            .plan(summary.id.as_str())
            .unwrap()
            .tasks
            .into_keys()
            .collect();

        let response = orch.execute_plan(summary.id.as_str()).await.unwrap();
        let reported: HashSet<String> = response.results.keys().cloned().collect();
        assert_eq!(reported, planned, "{}", name);
        assert_eq!(response.plan_id, summary.id);
    }
}

#[tokio::test(start_paused = true)]
async fn test_far_future_deadline_runs_normally() {
    let (orch, _) = orchestrator();
    let context = PlanContext {
        deadline_secs: Some(u64::MAX),
        ..PlanContext::default()
    };

    let response = orch
        .collaborate(
            PlanRequest::new("Study CRDTs")
                .with_template("research_analysis")
                .with_context(context),
        )
        .await
        .unwrap();

    assert_eq!(response.status, PlanStatus::Completed);
    assert!(!response.deadline_exceeded);
    assert_eq!(response.results.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_execute_runs_once() {
    let (orch, client) = orchestrator();
    client.script_task(
        "research",
        vec![Step::Delay(Duration::from_millis(50), ServiceOutput::text("facts"))],
    );
    let summary = orch
        .create_plan(PlanRequest::new("Study CRDTs").with_template("research_analysis"))
        .unwrap();
    let id = summary.id.as_str();

    let (first, second) = tokio::join!(orch.execute_plan(id), orch.execute_plan(id));
    let (winner, loser) = match (first, second) {
        (Ok(resp), Err(e)) | (Err(e), Ok(resp)) => (resp, e),
        other => panic!("expected exactly one winner, got {:?}", other),
    };
    assert!(matches!(loser, WeaveError::PlanAlreadyRunning(_)));
    assert_eq!(client.invocations().len(), summary.task_sequence.len());

    let cached = orch.execute_plan(id).await.unwrap();
    assert!(Arc::ptr_eq(&winner, &cached));
    assert_eq!(client.invocations().len(), summary.task_sequence.len());
    assert_eq!(orch.plan(id).unwrap().status, PlanStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_stops_the_plan() {
    let (orch, client) = orchestrator();
    client.script_task(
        "research",
        vec![Step::Delay(Duration::from_secs(30), ServiceOutput::text("late"))],
    );
    let context = PlanContext {
        deadline_secs: Some(5),
        ..PlanContext::default()
    };

    let response = orch
        .collaborate(
            PlanRequest::new("Study CRDTs")
                .with_template("research_analysis")
                .with_context(context),
        )
        .await
        .unwrap();

    assert!(response.deadline_exceeded);
    assert_eq!(response.status, PlanStatus::Failed);
    let research = &response.results["research"];
    assert_eq!(research.status, TaskStatus::Failed);
    assert_eq!(research.error.as_ref().unwrap().code, ErrorCode::DeadlineExceeded);
    for id in ["reasoning", "summary"] {
        assert_eq!(response.results[id].skip_reason, Some(SkipReason::DeadlineExceeded));
    }
}

#[tokio::test(start_paused = true)]
async fn test_max_concurrency_bounds_a_wave() {
    let (orch, client) = orchestrator_with(fan_out(5));
    client.script_service(
        "generalist",
        (0..5)
            .map(|_| Step::Delay(Duration::from_millis(100), ServiceOutput::text("ok")))
            .collect(),
    );
    let context = PlanContext {
        max_concurrency: Some(2),
        ..PlanContext::default()
    };

    let response = orch
        .collaborate(
            PlanRequest::new("fan out")
                .with_template("fan_out")
                .with_context(context),
        )
        .await
        .unwrap();

    assert_eq!(response.status, PlanStatus::Completed);
    assert_eq!(response.completed.len(), 5);
    assert_eq!(client.peak_concurrency(), 2);
}

#[tokio::test]
async fn test_every_template_yields_a_topological_sequence() {
    let (orch, _) = orchestrator();
    for name in orch.templates().templates.keys() {
        let summary = orch
            .create_plan(PlanRequest::new("anything at all").with_template(name.clone()))
            .unwrap();
        let plan = orch.plan(summary.id.as_str()).unwrap();
        assert_eq!(plan.task_sequence.len(), plan.tasks.len(), "{}", name);
        assert!(
            is_topological(&plan.task_sequence, |id| plan.tasks[id].dependencies.clone()),
            "{} is not topologically ordered",
            name
        );
    }
}

#[test]
fn test_selector_is_deterministic() {
    let caps: BTreeSet<String> = ["research".to_string()].into_iter().collect();
    let forward = vec![
        service("beta", &["research"], 2),
        service("alpha", &["research"], 2),
        service("low", &["research"], 1),
    ];
    let mut reversed = forward.clone();
    reversed.reverse();

    let a = select(&caps, &[], &[], &forward).map(|s| s.name.clone());
    let b = select(&caps, &[], &[], &reversed).map(|s| s.name.clone());
    assert_eq!(a.as_deref(), Some("alpha"));
    assert_eq!(a, b);
    for _ in 0..10 {
        assert_eq!(select(&caps, &[], &[], &forward).map(|s| s.name.clone()), a);
    }

    let preferred = select(&caps, &["low".to_string()], &[], &forward);
    assert_eq!(preferred.map(|s| s.name.as_str()), Some("low"));
    let excluded = select(&caps, &[], &["alpha".to_string()], &forward);
    assert_eq!(excluded.map(|s| s.name.as_str()), Some("beta"));
}
