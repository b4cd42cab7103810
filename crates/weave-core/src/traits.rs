use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{InvokeRequest, ServiceDescriptor, ServiceOutput};

/// Service client: the only way the engine talks to a capability provider.
///
/// Implementations do not enforce timeouts themselves; the executor and the
/// registry wrap every call in their own deadline.
pub trait ServiceClient: Send + Sync + 'static {
    /// Run a sub-prompt on the given service.
    fn invoke(
        &self,
        service: &ServiceDescriptor,
        request: InvokeRequest,
    ) -> BoxFuture<'_, Result<ServiceOutput>>;

    /// Check that the service is reachable and healthy.
    fn probe(&self, service: &ServiceDescriptor) -> BoxFuture<'_, Result<()>>;
}
