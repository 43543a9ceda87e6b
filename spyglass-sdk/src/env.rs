//! Environment entries injected into instrumented resources.
//!
//! The instrumenter writes these into the configuration of functions and
//! forwarding endpoints; the forwarding code reads them back at run time.

/// Name under which a function reports its own events.
pub const FUNCTION_NAME: &str = "SPY_FUNCTION_NAME";

/// Function name of the endpoint that receives a function's events.
pub const FORWARD_FUNCTION: &str = "SPY_FORWARD_FUNCTION";

/// Set to `"true"` on functions triggered by an observed queue.
pub const SUBSCRIBED_TO_QUEUE: &str = "SPY_SUBSCRIBED_TO_QUEUE";

/// Serialized routing table of a forwarding endpoint.
pub const ROUTING_TABLE: &str = "SPY_ROUTING_TABLE";

/// Address of the live channel endpoints publish to.
pub const CHANNEL_ENDPOINT: &str = "SPY_CHANNEL_ENDPOINT";

/// Execution wrapper hook consulted by the function runtime.
pub const EXEC_WRAPPER: &str = "SPY_EXEC_WRAPPER";
