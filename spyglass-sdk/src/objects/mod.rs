//! Wire types shared by instrumented resources, the relay, and listeners.

pub mod envelope;
pub mod payloads;

pub use envelope::{EVENT_BUS_ROUTE, ForwardedEvent, SpyEnvelope};
pub use payloads::{
    ConsoleOutput, EventBusEvent, FunctionConsole, FunctionError, FunctionRequest,
    FunctionResponse, ObjectStoreEvent, QueueMessage, TableChange, TopicMessage,
};
