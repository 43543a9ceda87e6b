//! Forwarder processor.
//!
//! The Forwarder is responsible for:
//! - Resolving the service key of a forwarded event through the receiving
//!   endpoint's routing table
//! - Stamping the event with the time it was accepted
//! - Publishing the resulting envelope to every live session

use kanau::processor::Processor;
use spyglass_sdk::objects::SpyEnvelope;
use tracing::{debug, warn};

use crate::config::{RouteError, RoutingStore};
use crate::events::{EnvelopeSender, Forward};

/// Publishes forwarded events as envelopes.
#[derive(Clone)]
pub struct Forwarder {
    routing: RoutingStore,
    envelopes: EnvelopeSender,
}

impl Forwarder {
    pub fn new(routing: RoutingStore, envelopes: EnvelopeSender) -> Self {
        Self { routing, envelopes }
    }

    /// Number of live sessions currently subscribed.
    pub fn session_count(&self) -> usize {
        self.envelopes.receiver_count()
    }
}

// ---------------------------------------------------------------------------
// Processor trait implementation
// ---------------------------------------------------------------------------

impl Processor<Forward> for Forwarder {
    type Output = SpyEnvelope;
    type Error = RouteError;

    async fn process(&self, forward: Forward) -> Result<SpyEnvelope, RouteError> {
        let key = match self.routing.resolve(&forward.endpoint, &forward.event).await {
            Ok(key) => key,
            Err(e) => {
                warn!(endpoint = %forward.endpoint, error = %e, "Dropping unroutable event");
                return Err(e);
            }
        };

        let envelope = SpyEnvelope::new(key, forward.event.into_data())
            .stamped(time::OffsetDateTime::now_utc());

        // Nobody listening is not an error; the event is simply not observed.
        match self.envelopes.send(envelope.clone()) {
            Ok(sessions) => debug!(key = %envelope.service_key, sessions, "Published envelope"),
            Err(_) => debug!(key = %envelope.service_key, "No live sessions, envelope dropped"),
        }
        Ok(envelope)
    }
}
