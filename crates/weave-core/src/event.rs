use chrono::{DateTime, Utc};

use crate::types::{HealthStatus, PlanId, PlanStatus, TaskStatus};

/// Lifecycle events emitted by the registry and the executor.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PlanCreated {
        plan_id: PlanId,
        template: String,
        tasks: usize,
    },
    WaveStarted {
        plan_id: PlanId,
        wave: usize,
        task_ids: Vec<String>,
    },
    TaskStarted {
        plan_id: PlanId,
        task_id: String,
        service: String,
    },
    TaskRetrying {
        plan_id: PlanId,
        task_id: String,
        attempt: u32,
        backoff_ms: u64,
        error: String,
    },
    TaskFinished {
        plan_id: PlanId,
        task_id: String,
        status: TaskStatus,
    },
    PlanFinished {
        plan_id: PlanId,
        status: PlanStatus,
        elapsed_ms: u64,
    },
    ServiceStatusChanged {
        service: String,
        from: HealthStatus,
        to: HealthStatus,
        at: DateTime<Utc>,
    },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
