//! Resource descriptions carried by topology nodes.
//!
//! Only the properties the instrumenter reads or writes are modelled.
//! Everything else about a resource belongs to the provisioning layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a node is.
///
/// Serialized internally tagged on `"kind"`, so a topology description
/// reads `{"kind": "table", "arn": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Resource {
    /// Structural container with no behaviour of its own.
    Group,
    Function(FunctionResource),
    Queue(QueueResource),
    /// Event-source mapping feeding a queue into a function.
    QueueTrigger(QueueTriggerResource),
    Topic(TopicResource),
    TopicSubscription(SubscriptionResource),
    ObjectStore(ObjectStoreResource),
    Table(TableResource),
    EventBus(EventBusResource),
    EventRule(EventRuleResource),
}

/// Observable capability of a node.
///
/// Closed set: every instrumentable kind has exactly one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Function,
    QueueTrigger,
    Topic,
    TopicSubscription,
    ObjectStore,
    Table,
    EventBus,
    EventRule,
}

impl Resource {
    /// `None` for groups and plain queues, which are observed through
    /// other nodes.
    pub fn capability(&self) -> Option<Capability> {
        match self {
            Resource::Group | Resource::Queue(_) => None,
            Resource::Function(_) => Some(Capability::Function),
            Resource::QueueTrigger(_) => Some(Capability::QueueTrigger),
            Resource::Topic(_) => Some(Capability::Topic),
            Resource::TopicSubscription(_) => Some(Capability::TopicSubscription),
            Resource::ObjectStore(_) => Some(Capability::ObjectStore),
            Resource::Table(_) => Some(Capability::Table),
            Resource::EventBus(_) => Some(Capability::EventBus),
            Resource::EventRule(_) => Some(Capability::EventRule),
        }
    }

    pub fn as_function(&self) -> Option<&FunctionResource> {
        match self {
            Resource::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut FunctionResource> {
        match self {
            Resource::Function(f) => Some(f),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-kind properties
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResource {
    pub function_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<String>,
    /// Functions this function is allowed to invoke.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub may_invoke: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_sources: Vec<EventSourceMapping>,
}

impl FunctionResource {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            ..Default::default()
        }
    }

    pub fn set_env(&mut self, name: &str, value: impl Into<String>) {
        self.environment.insert(name.to_owned(), value.into());
    }

    pub fn add_layer(&mut self, layer: &str) {
        if !self.layers.iter().any(|l| l == layer) {
            self.layers.push(layer.to_owned());
        }
    }

    pub fn grant_invoke(&mut self, function_name: &str) {
        if !self.may_invoke.iter().any(|f| f == function_name) {
            self.may_invoke.push(function_name.to_owned());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSourceMapping {
    pub source_arn: String,
    pub batch_size: u32,
    pub retry_attempts: u32,
    pub starting_position: StartingPosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StartingPosition {
    Latest,
    TrimHorizon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueResource {
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTriggerResource {
    pub queue_arn: String,
    pub function_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResource {
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResource {
    pub topic_arn: String,
    /// Function name the topic delivers to.
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_policy: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStoreResource {
    pub arn: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    /// Function name notified.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableResource {
    pub arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamView {
    KeysOnly,
    NewImage,
    OldImage,
    NewAndOldImages,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBusResource {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRuleResource {
    pub bus_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Value>,
    /// Function names the rule delivers to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}
