//! Graph instrumenter.
//!
//! [`GraphInstrumenter::instrument`] walks a [`Topology`] once, depth first
//! in child insertion order, and attaches a forwarding path to every node
//! with a [`Capability`]. Nodes the instrumenter created itself and the
//! forwarding endpoints are skipped together with their subtrees; every
//! other node is recursed into whether or not it was instrumented.
//!
//! Any unresolved reference or naming conflict aborts the pass.

mod context;
mod handlers;

pub use context::BuildContext;
pub use handlers::{OBJECT_CREATED_EVENT, catch_all_pattern};

use spyglass_sdk::ServiceKey;
use tracing::{debug, info};

use crate::pool::{RoutingDocument, RoutingError, SubscriptionPool};
use crate::registry::{RegistryError, ServiceKeyRegistry};
use crate::topology::{NodeId, Topology, TopologyError};

/// Fixed inputs of an instrumentation pass.
#[derive(Debug, Clone)]
pub struct InstrumenterSettings {
    /// Name of the group node holding everything the instrumenter adds.
    pub group_name: String,
    /// Address endpoints publish envelopes to.
    pub channel_address: String,
    /// Layer added to every observed function.
    pub interceptor_layer: String,
    /// Wrapper the function runtime runs the handler through.
    pub exec_wrapper: String,
}

impl Default for InstrumenterSettings {
    fn default() -> Self {
        Self {
            group_name: "Spyglass".to_owned(),
            channel_address: "ws://127.0.0.1:8080/ws".to_owned(),
            interceptor_layer: "spyglass-interceptor".to_owned(),
            exec_wrapper: "/opt/spyglass-wrapper".to_owned(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    #[error("subscription {subscription} refers to topic {topic_arn:?}, which is not in the topology")]
    TopicNotFound {
        subscription: String,
        topic_arn: String,
    },

    #[error("rule {rule} refers to event bus {bus_name:?}, which is not in the topology")]
    EventBusNotFound { rule: String, bus_name: String },

    #[error(transparent)]
    DuplicateServiceKey(#[from] RegistryError),

    #[error("endpoint {endpoint}: {source}")]
    DuplicateRoute {
        endpoint: String,
        #[source]
        source: RoutingError,
    },

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("failed to serialize routing table: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result of a successful pass.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    /// The input topology with every modification applied.
    pub topology: Topology,
    pub pool: SubscriptionPool,
    pub registry: ServiceKeyRegistry,
    /// Group node holding the instrumenter's own nodes.
    pub group: NodeId,
}

impl Instrumentation {
    pub fn service_keys(&self) -> &[ServiceKey] {
        self.registry.keys()
    }

    pub fn routing_document(&self) -> RoutingDocument {
        let functions = self
            .service_keys()
            .iter()
            .filter_map(|key| key.function_phase().map(|(name, _)| name));
        RoutingDocument::from_pool(&self.pool).with_functions(functions)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphInstrumenter {
    settings: InstrumenterSettings,
}

impl GraphInstrumenter {
    pub fn new(settings: InstrumenterSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &InstrumenterSettings {
        &self.settings
    }

    pub fn instrument(&self, topology: Topology) -> Result<Instrumentation, InstrumentError> {
        let mut ctx = BuildContext::new(topology, &self.settings)?;
        let root = ctx.topology.root();
        walk(&mut ctx, root)?;

        let instrumentation = ctx.finish()?;
        info!(
            endpoints = instrumentation.pool.len(),
            service_keys = instrumentation.registry.len(),
            "Instrumentation complete"
        );
        Ok(instrumentation)
    }
}

fn walk(ctx: &mut BuildContext<'_>, parent: NodeId) -> Result<(), InstrumentError> {
    // Handlers add nodes; only the children present on entry are visited.
    let children = ctx.topology.children(parent).to_vec();
    for child in children {
        if ctx.is_skipped(child) {
            debug!(node = %ctx.topology.path(child), "Skipping instrumenter-owned node");
            continue;
        }

        if let Some(capability) = ctx.topology.node(child).resource().capability() {
            if ctx.mark_instrumented(child) {
                handlers::handler(capability)(ctx, child)?;
            }
        }

        walk(ctx, child)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::EndpointId;
    use crate::topology::{
        EventBusResource, EventRuleResource, FunctionResource, ObjectStoreResource, QueueResource,
        QueueTriggerResource, Resource, StreamView, SubscriptionResource, TableResource,
        TopicResource,
    };
    use serde_json::json;
    use spyglass_sdk::env;
    use spyglass_sdk::objects::EVENT_BUS_ROUTE;
    use std::collections::BTreeSet;

    fn function(name: &str) -> Resource {
        Resource::Function(FunctionResource::new(name))
    }

    fn topic(arn: &str) -> Resource {
        Resource::Topic(TopicResource { arn: arn.to_owned() })
    }

    fn keys(instrumentation: &Instrumentation) -> Vec<&str> {
        instrumentation
            .service_keys()
            .iter()
            .map(ServiceKey::as_str)
            .collect()
    }

    fn instrument(topology: Topology) -> Instrumentation {
        GraphInstrumenter::default().instrument(topology).unwrap()
    }

    #[test]
    fn test_function_and_table_scenario() {
        let mut topology = Topology::new("Stack");
        let root = topology.root();
        let f = topology.add(root, "F", function("stack-f")).unwrap();
        let t = topology
            .add(
                root,
                "T",
                Resource::Table(TableResource {
                    arn: "arn:table/T".to_owned(),
                    stream: None,
                }),
            )
            .unwrap();

        let out = instrument(topology);
        assert_eq!(
            keys(&out),
            [
                "Function#F#Request",
                "Function#F#Error",
                "Function#F#Console",
                "Function#F#Response",
                "Table#T",
            ]
        );
        assert_eq!(out.pool.len(), 1);

        let Resource::Function(f) = out.topology.node(f).resource() else {
            panic!("F is a function");
        };
        let primary = &out.pool.get(EndpointId::PRIMARY).function_name;
        assert_eq!(f.environment[env::FUNCTION_NAME], "F");
        assert_eq!(&f.environment[env::FORWARD_FUNCTION], primary);
        assert_eq!(f.layers, ["spyglass-interceptor"]);
        assert_eq!(&f.may_invoke, &[primary.clone()]);

        let Resource::Table(t) = out.topology.node(t).resource() else {
            panic!("T is a table");
        };
        assert_eq!(t.stream, Some(StreamView::NewAndOldImages));

        let endpoint = out.pool.get(EndpointId::PRIMARY);
        let Resource::Function(e) = out.topology.node(endpoint.node).resource() else {
            panic!("endpoint is a function");
        };
        assert_eq!(e.event_sources.len(), 1);
        assert_eq!(e.event_sources[0].batch_size, 1);
        assert_eq!(e.event_sources[0].retry_attempts, 0);
        assert_eq!(e.environment[env::ROUTING_TABLE], r#"{"arn:table/T":"Table#T"}"#);
        assert_eq!(e.environment[env::CHANNEL_ENDPOINT], "ws://127.0.0.1:8080/ws");
        // Endpoints are never instrumented themselves.
        assert!(!e.environment.contains_key(env::FUNCTION_NAME));
    }

    #[test]
    fn test_topics_share_endpoint_until_conflict() {
        let mut topology = Topology::new("Stack");
        let root = topology.root();
        topology.add(root, "A", topic("arn:topic/A")).unwrap();
        topology.add(root, "B", topic("arn:topic/B")).unwrap();
        let out = instrument(topology.clone());
        assert_eq!(out.pool.len(), 1);

        let consumer = topology.add(root, "Consumer", function("consumer")).unwrap();
        topology
            .add(
                consumer,
                "ASub",
                Resource::TopicSubscription(SubscriptionResource {
                    topic_arn: "arn:topic/A".to_owned(),
                    endpoint: "consumer".to_owned(),
                    filter_policy: Some(json!({"type": ["order"]})),
                }),
            )
            .unwrap();
        let out = instrument(topology);
        assert_eq!(out.pool.len(), 2);

        let (_, second) = out.pool.iter().nth(1).unwrap();
        assert_eq!(
            second.routing.get("arn:topic/A").map(ServiceKey::as_str),
            Some("TopicSubscription#A#Consumer")
        );
        // The derived subscription carries the original filter policy.
        let derived = out.topology.children(second.node)[0];
        let Resource::TopicSubscription(derived) = out.topology.node(derived).resource() else {
            panic!("derived node is a subscription");
        };
        assert_eq!(derived.filter_policy, Some(json!({"type": ["order"]})));
        assert_eq!(derived.endpoint, second.function_name);
    }

    #[test]
    fn test_routes_and_keys_biject() {
        let mut topology = Topology::new("Stack");
        let root = topology.root();
        let app = topology.add(root, "App", Resource::Group).unwrap();
        topology.add(app, "Worker", function("worker")).unwrap();
        topology
            .add(app, "Jobs", Resource::Queue(QueueResource { arn: "arn:queue/Jobs".to_owned() }))
            .unwrap();
        topology
            .add(
                app,
                "JobsTrigger",
                Resource::QueueTrigger(QueueTriggerResource {
                    queue_arn: "arn:queue/Jobs".to_owned(),
                    function_name: "worker".to_owned(),
                }),
            )
            .unwrap();
        topology
            .add(
                app,
                "Uploads",
                Resource::ObjectStore(ObjectStoreResource {
                    arn: "arn:bucket/uploads".to_owned(),
                    notifications: Vec::new(),
                }),
            )
            .unwrap();
        topology.add(app, "Events", topic("arn:topic/events")).unwrap();
        topology
            .add(app, "Bus", Resource::EventBus(EventBusResource { name: "orders".to_owned() }))
            .unwrap();
        topology
            .add(
                app,
                "OnPaid",
                Resource::EventRule(EventRuleResource {
                    bus_name: "orders".to_owned(),
                    pattern: Some(json!({"detail-type": ["paid"]})),
                    targets: vec!["worker".to_owned()],
                }),
            )
            .unwrap();

        let out = instrument(topology);

        let mut routed = Vec::new();
        for (_, endpoint) in out.pool.iter() {
            for (_, key) in endpoint.routing.iter() {
                routed.push(key.clone());
            }
        }
        let unique: BTreeSet<_> = routed.iter().cloned().collect();
        assert_eq!(unique.len(), routed.len(), "a key is routed twice");

        let registered_resources: BTreeSet<_> = out
            .service_keys()
            .iter()
            .filter(|k| k.function_phase().is_none())
            .cloned()
            .collect();
        assert_eq!(registered_resources, unique);

        let keys = keys(&out);
        for expected in [
            "Queue#App/Jobs",
            "ObjectStore#App/Uploads",
            "Topic#App/Events",
            "EventBus#App/Bus",
            "EventRule#App/Bus#App/OnPaid",
        ] {
            assert!(keys.contains(&expected), "missing {expected}");
        }

        // Bus and rule each need an endpoint of their own.
        let bus_bound = out.pool.iter().filter(|(_, e)| e.bound_to_event_bus).count();
        assert_eq!(bus_bound, 2);
        for (_, e) in out.pool.iter().filter(|(_, e)| e.bound_to_event_bus) {
            assert!(e.routing.get(EVENT_BUS_ROUTE).is_some());
        }

        let worker = out.topology.lookup("App/Worker").unwrap();
        let Resource::Function(worker) = out.topology.node(worker).resource() else {
            panic!("worker is a function");
        };
        assert_eq!(worker.environment[env::SUBSCRIBED_TO_QUEUE], "true");
    }

    #[test]
    fn test_event_bus_gets_owned_catch_all_rule() {
        let mut topology = Topology::new("Stack");
        let root = topology.root();
        topology
            .add(root, "Bus", Resource::EventBus(EventBusResource { name: "b".to_owned() }))
            .unwrap();
        let out = instrument(topology);

        let rule = out.topology.lookup("Spyglass/RuleAllBus").unwrap();
        assert!(out.topology.node(rule).is_owned());
        let Resource::EventRule(rule) = out.topology.node(rule).resource() else {
            panic!("catch-all is a rule");
        };
        assert_eq!(rule.pattern, Some(catch_all_pattern()));
        assert_eq!(rule.targets, [out.pool.get(EndpointId::PRIMARY).function_name.clone()]);
        // The owned rule itself is not instrumented.
        assert_eq!(keys(&out), ["EventBus#Bus"]);
    }

    #[test]
    fn test_separator_placement_keeps_owned_names_apart() {
        let mut topology = Topology::new("Stack");
        let root = topology.root();
        let x = topology.add(root, "X", Resource::Group).unwrap();
        let xa = topology.add(root, "XA", Resource::Group).unwrap();
        topology.add(x, "AB", topic("arn:topic/x-ab")).unwrap();
        topology.add(xa, "B", topic("arn:topic/xa-b")).unwrap();
        topology
            .add(x, "ABus", Resource::EventBus(EventBusResource { name: "x".to_owned() }))
            .unwrap();
        topology
            .add(xa, "Bus", Resource::EventBus(EventBusResource { name: "xa".to_owned() }))
            .unwrap();

        let out = instrument(topology);

        let primary = out.pool.get(EndpointId::PRIMARY);
        let subscriptions: Vec<_> = out
            .topology
            .children(primary.node)
            .iter()
            .map(|&child| out.topology.node(child).name().to_owned())
            .collect();
        assert_eq!(subscriptions, ["X_SABSubscription", "XA_SBSubscription"]);
        assert!(out.topology.lookup("Spyglass/RuleAllX_SABus").is_some());
        assert!(out.topology.lookup("Spyglass/RuleAllXA_SBus").is_some());

        let keys = keys(&out);
        for expected in ["Topic#X/AB", "Topic#XA/B", "EventBus#X/ABus", "EventBus#XA/Bus"] {
            assert!(keys.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn test_store_and_queue_stay_on_primary_after_pool_grows() {
        let mut topology = Topology::new("Stack");
        let root = topology.root();
        topology
            .add(root, "Bus", Resource::EventBus(EventBusResource { name: "orders".to_owned() }))
            .unwrap();
        topology
            .add(
                root,
                "OnPaid",
                Resource::EventRule(EventRuleResource {
                    bus_name: "orders".to_owned(),
                    pattern: None,
                    targets: vec!["billing".to_owned()],
                }),
            )
            .unwrap();
        topology.add(root, "Worker", function("worker")).unwrap();
        topology
            .add(root, "Jobs", Resource::Queue(QueueResource { arn: "arn:queue/Jobs".to_owned() }))
            .unwrap();
        topology
            .add(
                root,
                "JobsTrigger",
                Resource::QueueTrigger(QueueTriggerResource {
                    queue_arn: "arn:queue/Jobs".to_owned(),
                    function_name: "worker".to_owned(),
                }),
            )
            .unwrap();
        topology
            .add(
                root,
                "Uploads",
                Resource::ObjectStore(ObjectStoreResource {
                    arn: "arn:bucket/uploads".to_owned(),
                    notifications: Vec::new(),
                }),
            )
            .unwrap();

        let out = instrument(topology);
        assert!(out.pool.len() >= 2);

        let primary = out.pool.get(EndpointId::PRIMARY);
        assert_eq!(
            primary.routing.get("arn:bucket/uploads").map(ServiceKey::as_str),
            Some("ObjectStore#Uploads")
        );
        assert_eq!(
            primary.routing.get("arn:queue/Jobs").map(ServiceKey::as_str),
            Some("Queue#Jobs")
        );
        for (id, endpoint) in out.pool.iter().filter(|(id, _)| *id != EndpointId::PRIMARY) {
            assert!(endpoint.routing.get("arn:bucket/uploads").is_none(), "{id} routes the store");
            assert!(endpoint.routing.get("arn:queue/Jobs").is_none(), "{id} routes the queue");
        }

        let uploads = out.topology.lookup("Uploads").unwrap();
        let Resource::ObjectStore(uploads) = out.topology.node(uploads).resource() else {
            panic!("uploads is an object store");
        };
        assert_eq!(uploads.notifications[0].target, primary.function_name);

        // The rule keeps its own target and gains the endpoint.
        let rule = out.topology.lookup("OnPaid").unwrap();
        let Resource::EventRule(rule) = out.topology.node(rule).resource() else {
            panic!("OnPaid is a rule");
        };
        let rule_endpoint = out
            .pool
            .iter()
            .find(|(_, e)| {
                e.routing.get(EVENT_BUS_ROUTE).map(ServiceKey::as_str) == Some("EventRule#Bus#OnPaid")
            })
            .map(|(_, e)| e.function_name.clone())
            .unwrap();
        assert_eq!(rule.targets, ["billing".to_owned(), rule_endpoint]);
    }

    #[test]
    fn test_unresolved_references_abort() {
        let mut topology = Topology::new("Stack");
        let root = topology.root();
        let consumer = topology.add(root, "Consumer", function("consumer")).unwrap();
        topology
            .add(
                consumer,
                "Sub",
                Resource::TopicSubscription(SubscriptionResource {
                    topic_arn: "arn:topic/missing".to_owned(),
                    endpoint: "consumer".to_owned(),
                    filter_policy: None,
                }),
            )
            .unwrap();
        let err = GraphInstrumenter::default().instrument(topology).unwrap_err();
        assert!(
            matches!(&err, InstrumentError::TopicNotFound { subscription, topic_arn }
                if subscription == "Stack/Consumer/Sub" && topic_arn == "arn:topic/missing")
        );

        let mut topology = Topology::new("Stack");
        let root = topology.root();
        topology
            .add(
                root,
                "Rule",
                Resource::EventRule(EventRuleResource {
                    bus_name: "nowhere".to_owned(),
                    pattern: None,
                    targets: Vec::new(),
                }),
            )
            .unwrap();
        assert!(matches!(
            GraphInstrumenter::default().instrument(topology),
            Err(InstrumentError::EventBusNotFound { .. })
        ));
    }

    #[test]
    fn test_unresolved_queue_trigger_is_skipped() {
        let mut topology = Topology::new("Stack");
        let root = topology.root();
        topology
            .add(
                root,
                "Trigger",
                Resource::QueueTrigger(QueueTriggerResource {
                    queue_arn: "arn:queue/none".to_owned(),
                    function_name: "none".to_owned(),
                }),
            )
            .unwrap();
        let out = instrument(topology);
        assert!(out.service_keys().is_empty());
    }

    #[test]
    fn test_group_name_collision_aborts() {
        let mut topology = Topology::new("Stack");
        let root = topology.root();
        topology.add(root, "Spyglass", Resource::Group).unwrap();
        assert!(matches!(
            GraphInstrumenter::default().instrument(topology),
            Err(InstrumentError::Topology(TopologyError::DuplicateName { .. }))
        ));
    }
}
