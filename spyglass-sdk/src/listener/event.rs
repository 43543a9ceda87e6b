use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;

use crate::service_key::ServiceKey;

/// An event as observed by a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct SpyEvent<T = Value> {
    pub service_key: ServiceKey,
    pub payload: T,
    /// Wall-clock time the listener received the frame.
    pub received_at: OffsetDateTime,
    /// Time stamped by the forwarding endpoint, when present.
    pub sent_at: Option<OffsetDateTime>,
    /// Arrival order within the listener session. Strictly increasing.
    pub sequence: u64,
}

impl SpyEvent<Value> {
    /// Decode the payload into the caller's type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<SpyEvent<T>, serde_json::Error> {
        Ok(SpyEvent {
            service_key: self.service_key.clone(),
            payload: T::deserialize(&self.payload)?,
            received_at: self.received_at,
            sent_at: self.sent_at,
            sequence: self.sequence,
        })
    }
}
