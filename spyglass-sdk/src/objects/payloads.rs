//! Payload shapes per service kind.
//!
//! These are the `data` objects inside a [`SpyEnvelope`](super::SpyEnvelope).
//! Each is generic over the application's own types so a test can wait
//! with `listener.wait::<FunctionRequest<MyInput>>(...)`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `Function#<name>#Request`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRequest<Req = Value> {
    pub request: Req,
}

/// `Function#<name>#Response`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse<Resp = Value, Req = Value> {
    pub request: Req,
    pub response: Resp,
}

/// `Function#<name>#Error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionError<Req = Value> {
    pub request: Req,
    pub error: Value,
}

/// One captured console call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleOutput {
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// `Function#<name>#Console`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionConsole<Req = Value> {
    pub request: Req,
    pub console_output: ConsoleOutput,
}

/// `Table#<name>`: one change-stream record with both images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableChange<Item = Value> {
    pub new_image: Option<Item>,
    pub old_image: Option<Item>,
    #[serde(default)]
    pub keys: Value,
    #[serde(default)]
    pub event_name: Option<String>,
}

/// `EventBus#<bus>` and `EventRule#<bus>#<rule>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBusEvent<Detail = Value> {
    pub detail: Detail,
    pub detail_type: String,
    pub source: String,
    pub time: String,
    pub account: String,
}

/// `Topic#<name>` and `TopicSubscription#<topic>#<target>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessage<Message = Value> {
    pub message: Message,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message_attributes: Value,
}

/// `Queue#<name>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage<Body = Value> {
    pub body: Body,
    #[serde(default)]
    pub message_attributes: Value,
}

/// `ObjectStore#<name>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreEvent {
    pub bucket: String,
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
    pub event_name: String,
}
