use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use weave_core::error::{Result, WeaveError};
use weave_core::types::{Plan, PlanId, PlanStatus};

use crate::aggregator::CollaborationResponse;

enum Slot {
    Idle,
    Running,
    Finished(Arc<CollaborationResponse>),
}

struct Entry {
    plan: Plan,
    slot: Slot,
}

/// Outcome of asking to execute a stored plan.
pub enum Claim {
    /// The caller owns the execution and must call `complete` or `release`.
    Acquired(Plan),
    /// Another caller is executing the plan.
    Running,
    /// The plan already ran; this is its response.
    Finished(Arc<CollaborationResponse>),
}

/// Row in the plan listing.
#[derive(Debug, Clone, Serialize)]
pub struct PlanListing {
    pub id: PlanId,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub task_count: usize,
}

/// In-memory plan store keyed by plan id.
///
/// `claim` is the single point that decides who executes a plan, so a plan
/// runs at most once no matter how many callers race on it.
#[derive(Default)]
pub struct PlanStore {
    plans: Mutex<HashMap<String, Entry>>,
}

impl PlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, plan: Plan) {
        let mut plans = self.plans.lock().unwrap_or_else(PoisonError::into_inner);
        plans.insert(
            plan.id.to_string(),
            Entry {
                plan,
                slot: Slot::Idle,
            },
        );
    }

    pub fn get(&self, id: &str) -> Result<Plan> {
        self.plans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|e| e.plan.clone())
            .ok_or_else(|| WeaveError::PlanNotFound(id.to_string()))
    }

    /// All stored plans, oldest first.
    pub fn list(&self) -> Vec<PlanListing> {
        let plans = self.plans.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<PlanListing> = plans
            .values()
            .map(|e| PlanListing {
                id: e.plan.id.clone(),
                status: e.plan.status,
                created_at: e.plan.created_at,
                task_count: e.plan.tasks.len(),
            })
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        rows
    }

    pub fn len(&self) -> usize {
        self.plans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Try to take ownership of a plan's execution.
    pub fn claim(&self, id: &str) -> Result<Claim> {
        let mut plans = self.plans.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = plans
            .get_mut(id)
            .ok_or_else(|| WeaveError::PlanNotFound(id.to_string()))?;
        match &entry.slot {
            Slot::Running => Ok(Claim::Running),
            Slot::Finished(response) => Ok(Claim::Finished(response.clone())),
            Slot::Idle => {
                entry.slot = Slot::Running;
                entry.plan.status = PlanStatus::Running;
                Ok(Claim::Acquired(entry.plan.clone()))
            }
        }
    }

    /// Record the executed plan and cache its response.
    pub fn complete(&self, plan: Plan, response: CollaborationResponse) -> Arc<CollaborationResponse> {
        let response = Arc::new(response);
        let mut plans = self.plans.lock().unwrap_or_else(PoisonError::into_inner);
        plans.insert(
            plan.id.to_string(),
            Entry {
                plan,
                slot: Slot::Finished(response.clone()),
            },
        );
        response
    }

    /// Give up a claim without a result so the plan can be executed again.
    pub fn release(&self, id: &str) {
        let mut plans = self.plans.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = plans.get_mut(id) {
            if matches!(entry.slot, Slot::Running) {
                entry.slot = Slot::Idle;
                entry.plan.status = PlanStatus::Created;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use weave_core::types::PlanContext;

    fn plan() -> Plan {
        Plan {
            id: PlanId::new(),
            prompt: "p".into(),
            template: "general".into(),
            task_sequence: vec![],
            tasks: HashMap::new(),
            context: PlanContext::default(),
            estimated_duration_secs: 30,
            created_at: Utc::now(),
            status: PlanStatus::Created,
        }
    }

    fn response(plan: &Plan) -> CollaborationResponse {
        CollaborationResponse {
            plan_id: plan.id.clone(),
            status: PlanStatus::Completed,
            results: BTreeMap::new(),
            summary: "done".into(),
            execution_time_ms: 1,
            services_used: vec![],
            completed: vec![],
            failed: vec![],
            skipped: vec![],
            deadline_exceeded: false,
        }
    }

    #[test]
    fn test_claim_lifecycle() {
        let store = PlanStore::new();
        let p = plan();
        let id = p.id.to_string();
        store.insert(p);

        let Claim::Acquired(mut claimed) = store.claim(&id).unwrap() else {
            panic!("first claim must acquire");
        };
        assert_eq!(claimed.status, PlanStatus::Running);
        assert!(matches!(store.claim(&id).unwrap(), Claim::Running));
        assert_eq!(store.get(&id).unwrap().status, PlanStatus::Running);

        claimed.status = PlanStatus::Completed;
        let resp = response(&claimed);
        store.complete(claimed, resp);
        match store.claim(&id).unwrap() {
            Claim::Finished(r) => assert_eq!(r.summary, "done"),
            _ => panic!("expected cached response"),
        }
        assert_eq!(store.get(&id).unwrap().status, PlanStatus::Completed);
    }

    #[test]
    fn test_release_allows_reclaim() {
        let store = PlanStore::new();
        let p = plan();
        let id = p.id.to_string();
        store.insert(p);

        assert!(matches!(store.claim(&id).unwrap(), Claim::Acquired(_)));
        store.release(&id);
        assert_eq!(store.get(&id).unwrap().status, PlanStatus::Created);
        assert!(matches!(store.claim(&id).unwrap(), Claim::Acquired(_)));
    }

    #[test]
    fn test_unknown_plan() {
        let store = PlanStore::new();
        assert!(matches!(
            store.claim("missing"),
            Err(WeaveError::PlanNotFound(_))
        ));
        assert!(store.get("missing").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_list_counts_tasks() {
        let store = PlanStore::new();
        store.insert(plan());
        store.insert(plan());
        let rows = store.list();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.task_count == 0));
    }
}
