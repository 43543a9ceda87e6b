//! Shared routing document with change notification.
//!
//! The relay reads routing tables on every forwarded event and replaces
//! them wholesale on reload. Readers never observe a partially applied
//! document.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use spyglass_sdk::ServiceKey;
use spyglass_sdk::objects::ForwardedEvent;
use tokio::sync::RwLock;

use crate::pool::RoutingDocument;

/// Why a forwarded event could not be given a service key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("unknown forwarding endpoint {0:?}")]
    UnknownEndpoint(String),

    #[error("endpoint {endpoint:?} has no route for {identity:?}")]
    UnknownIdentity { endpoint: String, identity: String },

    #[error("function {function:?} forwarded to {endpoint:?} is not observed")]
    UnknownFunction { endpoint: String, function: String },
}

/// The relay's current [`RoutingDocument`], versioned.
#[derive(Clone)]
pub struct RoutingStore {
    inner: Arc<RoutingStoreInner>,
}

struct RoutingStoreInner {
    document: RwLock<RoutingDocument>,
    version: AtomicU64,
}

// -- RoutingStore -------------------------------------------------------

impl RoutingStore {
    pub fn new(initial: RoutingDocument) -> Self {
        Self {
            inner: Arc::new(RoutingStoreInner {
                document: RwLock::new(initial),
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Swap in a new document. Returns the new version.
    pub async fn replace(&self, document: RoutingDocument) -> u64 {
        let mut guard = self.inner.document.write().await;
        *guard = document;
        self.inner.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Relaxed)
    }

    pub async fn endpoint_count(&self) -> usize {
        self.inner.document.read().await.len()
    }

    /// Service key of `event` as received by `endpoint`.
    ///
    /// Function events name themselves and must name an observed function;
    /// every other event is looked up in the endpoint's routing table.
    pub async fn resolve(
        &self,
        endpoint: &str,
        event: &ForwardedEvent,
    ) -> Result<ServiceKey, RouteError> {
        let document = self.inner.document.read().await;
        let table = document
            .table(endpoint)
            .ok_or_else(|| RouteError::UnknownEndpoint(endpoint.to_owned()))?;

        match event {
            ForwardedEvent::Function {
                function_name,
                phase,
                ..
            } => {
                if !document.knows_function(function_name) {
                    return Err(RouteError::UnknownFunction {
                        endpoint: endpoint.to_owned(),
                        function: function_name.clone(),
                    });
                }
                Ok(ServiceKey::function(function_name, *phase))
            }
            other => {
                let identity = other.route().unwrap_or_default();
                table
                    .get(identity)
                    .cloned()
                    .ok_or_else(|| RouteError::UnknownIdentity {
                        endpoint: endpoint.to_owned(),
                        identity: identity.to_owned(),
                    })
            }
        }
    }
}
