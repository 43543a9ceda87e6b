//! Envelopes carried from resources to the relay and from the relay to
//! listeners.
//!
//! # Protocol
//!
//! 1. An instrumented resource (or the interceptor wrapping a function)
//!    posts a [`ForwardedEvent`] to its forwarding endpoint.
//! 2. The endpoint resolves the event's service key through its routing
//!    table and publishes a [`SpyEnvelope`] on the live channel.
//! 3. Every connected listener receives the envelope as one JSON text
//!    frame:
//!
//! ```json
//! {"serviceKey":"Table#Orders","data":{"newImage":{...},"oldImage":null},"timestamp":"2024-05-01T10:00:00Z"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::service_key::{FunctionPhase, ServiceKey};

/// Routing table identity shared by all event-bus sourced events.
///
/// An endpoint is bound to at most one event bus, so bus events do not
/// need a per-resource identity.
pub const EVENT_BUS_ROUTE: &str = "eventBus";

/// One event on the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpyEnvelope {
    pub service_key: ServiceKey,
    pub data: Value,
    /// Time the forwarding endpoint accepted the event.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<OffsetDateTime>,
}

impl SpyEnvelope {
    pub fn new(service_key: ServiceKey, data: Value) -> Self {
        Self {
            service_key,
            data,
            timestamp: None,
        }
    }

    pub fn stamped(mut self, at: OffsetDateTime) -> Self {
        self.timestamp = Some(at);
        self
    }
}

/// A raw event as handed to a forwarding endpoint.
///
/// Internally tagged on `"origin"`:
///
/// ```json
/// {"origin":"function","functionName":"Orders/Create","phase":"request","data":{...}}
/// {"origin":"resource","source":"arn:table/Orders","data":{...}}
/// {"origin":"eventBus","data":{...}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "camelCase")]
pub enum ForwardedEvent {
    /// Captured by the interceptor inside an instrumented function. The
    /// function knows its own name, so no routing lookup is needed.
    #[serde(rename_all = "camelCase")]
    Function {
        function_name: String,
        phase: FunctionPhase,
        data: Value,
    },

    /// Delivered by a topic, queue, table stream, or object store. Routed
    /// by the source resource's identity.
    #[serde(rename_all = "camelCase")]
    Resource { source: String, data: Value },

    /// Delivered by the event-bus rule bound to the endpoint.
    EventBus { data: Value },
}

impl ForwardedEvent {
    /// Identity to look up in the endpoint's routing table, if any.
    pub fn route(&self) -> Option<&str> {
        match self {
            ForwardedEvent::Function { .. } => None,
            ForwardedEvent::Resource { source, .. } => Some(source),
            ForwardedEvent::EventBus { .. } => Some(EVENT_BUS_ROUTE),
        }
    }

    pub fn into_data(self) -> Value {
        match self {
            ForwardedEvent::Function { data, .. }
            | ForwardedEvent::Resource { data, .. }
            | ForwardedEvent::EventBus { data } => data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let frame = r#"{"serviceKey":"Table#Orders","data":{"newImage":{"id":"1"}},"timestamp":"2024-05-01T10:00:00Z"}"#;
        let envelope: SpyEnvelope = serde_json::from_str(frame).unwrap();
        assert_eq!(envelope.service_key.as_str(), "Table#Orders");
        assert_eq!(envelope.data["newImage"]["id"], "1");
        assert!(envelope.timestamp.is_some());

        let bare: SpyEnvelope =
            serde_json::from_str(r#"{"serviceKey":"Queue#Jobs","data":{}}"#).unwrap();
        assert!(bare.timestamp.is_none());
        let out = serde_json::to_value(&bare).unwrap();
        assert!(out.get("timestamp").is_none());
    }

    #[test]
    fn test_forwarded_event_routes() {
        let function: ForwardedEvent = serde_json::from_value(json!({
            "origin": "function",
            "functionName": "Orders/Create",
            "phase": "console",
            "data": {"request": {}}
        }))
        .unwrap();
        assert_eq!(function.route(), None);

        let resource: ForwardedEvent = serde_json::from_value(json!({
            "origin": "resource",
            "source": "arn:table/Orders",
            "data": {}
        }))
        .unwrap();
        assert_eq!(resource.route(), Some("arn:table/Orders"));

        let bus: ForwardedEvent =
            serde_json::from_value(json!({"origin": "eventBus", "data": {"detail": 1}})).unwrap();
        assert_eq!(bus.route(), Some(EVENT_BUS_ROUTE));
        assert_eq!(bus.into_data(), json!({"detail": 1}));
    }
}
