use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use weave_core::config::{AppConfig, RegistryConfig};
use weave_core::event::{EngineEvent, EventBus};
use weave_core::traits::ServiceClient;
use weave_core::types::{HealthStatus, ServiceDescriptor};

/// Immutable view of the registry at one instant.
pub type Snapshot = Arc<Vec<ServiceDescriptor>>;

/// Live set of capability providers with periodic health probing.
///
/// Readers take a `snapshot()` (an `Arc` clone under a short read lock) and
/// never observe a half-applied probe round. Writers build a fresh vector and
/// swap it in. Entries are never removed because a probe failed; an offline
/// service comes back as soon as a later probe succeeds.
pub struct ServiceRegistry {
    services: RwLock<Snapshot>,
    client: Arc<dyn ServiceClient>,
    config: RegistryConfig,
    event_bus: Arc<EventBus>,
}

impl ServiceRegistry {
    pub fn new(
        client: Arc<dyn ServiceClient>,
        config: RegistryConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            services: RwLock::new(Arc::new(Vec::new())),
            client,
            config,
            event_bus,
        }
    }

    /// Build a registry holding every `[[services]]` entry, all `unknown`.
    pub fn from_config(
        config: &AppConfig,
        client: Arc<dyn ServiceClient>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let registry = Self::new(client, config.registry.clone(), event_bus);
        for svc in &config.services {
            registry.register(svc.descriptor());
        }
        registry
    }

    /// Add a service, replacing any existing entry with the same name.
    pub fn register(&self, descriptor: ServiceDescriptor) {
        let mut guard = self.services.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<ServiceDescriptor> = guard.as_ref().clone();
        match next.iter_mut().find(|s| s.name == descriptor.name) {
            Some(existing) => *existing = descriptor,
            None => next.push(descriptor),
        }
        *guard = Arc::new(next);
    }

    /// Override a service's health status. Returns false for unknown names.
    pub fn set_status(&self, name: &str, status: HealthStatus) -> bool {
        let previous = {
            let mut guard = self.services.write().unwrap_or_else(PoisonError::into_inner);
            let mut next: Vec<ServiceDescriptor> = guard.as_ref().clone();
            let Some(svc) = next.iter_mut().find(|s| s.name == name) else {
                return false;
            };
            let previous = svc.status;
            svc.status = status;
            *guard = Arc::new(next);
            previous
        };
        if previous != status {
            self.publish_change(name, previous, status);
        }
        true
    }

    /// Consistent copy of the current service set.
    pub fn snapshot(&self) -> Snapshot {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<ServiceDescriptor> {
        self.snapshot().iter().find(|s| s.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Probe every service concurrently and apply the results in one swap.
    pub async fn probe_all(&self) -> Snapshot {
        let current = self.snapshot();
        let timeout = Duration::from_secs(self.config.probe_timeout_secs);

        let probes = current.iter().map(|svc| {
            let client = self.client.clone();
            async move {
                let status = match tokio::time::timeout(timeout, client.probe(svc)).await {
                    Ok(Ok(())) => HealthStatus::Online,
                    Ok(Err(e)) => {
                        debug!(service = %svc.name, error = %e, "Probe failed");
                        HealthStatus::Offline
                    }
                    Err(_) => {
                        debug!(service = %svc.name, timeout_secs = timeout.as_secs(), "Probe timed out");
                        HealthStatus::Offline
                    }
                };
                (svc.name.clone(), status)
            }
        });
        let results = futures::future::join_all(probes).await;

        let now = Utc::now();
        let mut changes = Vec::new();
        let updated = {
            let mut guard = self.services.write().unwrap_or_else(PoisonError::into_inner);
            // Merge by name so registrations made during the probe round survive.
            let mut next: Vec<ServiceDescriptor> = guard.as_ref().clone();
            for (name, status) in results {
                if let Some(svc) = next.iter_mut().find(|s| s.name == name) {
                    if svc.status != status {
                        changes.push((name, svc.status, status));
                    }
                    svc.status = status;
                    svc.last_probed = Some(now);
                }
            }
            let next = Arc::new(next);
            *guard = next.clone();
            next
        };

        for (name, from, to) in changes {
            self.publish_change(&name, from, to);
        }

        let online = updated
            .iter()
            .filter(|s| s.status == HealthStatus::Online)
            .count();
        debug!(online, total = updated.len(), "Probe round complete");
        updated
    }

    /// Probe immediately, then every `probe_interval_secs`. Blocks until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.probe_interval_secs);
        info!(
            interval_secs = self.config.probe_interval_secs,
            services = self.len(),
            "Service prober started"
        );

        loop {
            tokio::select! {
                _ = self.probe_all() => {}
                _ = cancel.cancelled() => break,
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => break,
            }
        }
        info!("Service prober shutting down");
    }

    fn publish_change(&self, name: &str, from: HealthStatus, to: HealthStatus) {
        if to == HealthStatus::Offline {
            warn!(service = %name, %from, %to, "Service went offline");
        } else {
            info!(service = %name, %from, %to, "Service status changed");
        }
        self.event_bus.publish(EngineEvent::ServiceStatusChanged {
            service: name.to_string(),
            from,
            to,
            at: Utc::now(),
        });
    }
}
