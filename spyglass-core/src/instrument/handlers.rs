//! One handler per capability.
//!
//! Each handler attaches exactly one forwarding path to its node, routes
//! the node's identity on the chosen endpoint, and registers the node's
//! service keys. Handlers run at most once per node.

use serde_json::json;
use spyglass_sdk::objects::EVENT_BUS_ROUTE;
use spyglass_sdk::{FunctionPhase, ServiceKey, ServiceKind, env};
use tracing::debug;

use super::InstrumentError;
use super::context::{BuildContext, flatten_name};
use crate::pool::{EndpointId, ForwardingEndpoint};
use crate::topology::{
    Capability, EventRuleResource, EventSourceMapping, Notification, NodeId, Resource,
    StartingPosition, StreamView,
};

pub(super) type Handler = fn(&mut BuildContext<'_>, NodeId) -> Result<(), InstrumentError>;

/// Object-store event that triggers forwarding.
pub const OBJECT_CREATED_EVENT: &str = "s3:ObjectCreated:Put";

/// Catch-all pattern of the rule attached to an observed event bus.
pub fn catch_all_pattern() -> serde_json::Value {
    json!({"version": ["0"]})
}

pub(super) fn handler(capability: Capability) -> Handler {
    match capability {
        Capability::Function => function,
        Capability::QueueTrigger => queue_trigger,
        Capability::Topic => topic,
        Capability::TopicSubscription => topic_subscription,
        Capability::ObjectStore => object_store,
        Capability::Table => table,
        Capability::EventBus => event_bus,
        Capability::EventRule => event_rule,
    }
}

fn unbound(endpoint: &ForwardingEndpoint) -> bool {
    !endpoint.bound_to_event_bus
}

fn function(ctx: &mut BuildContext<'_>, node: NodeId) -> Result<(), InstrumentError> {
    let name = ctx.name_of(node);
    let primary = ctx.pool.get(EndpointId::PRIMARY).function_name.clone();
    let settings = ctx.settings;

    let Some(function) = ctx.function_mut(node) else {
        return Ok(());
    };
    function.add_layer(&settings.interceptor_layer);
    function.set_env(env::EXEC_WRAPPER, settings.exec_wrapper.clone());
    function.set_env(env::FUNCTION_NAME, name.clone());
    function.set_env(env::FORWARD_FUNCTION, primary.clone());
    function.grant_invoke(&primary);

    for phase in FunctionPhase::ALL {
        ctx.register(ServiceKey::function(&name, phase))?;
    }
    debug!(function = %name, "Instrumented function");
    Ok(())
}

fn queue_trigger(ctx: &mut BuildContext<'_>, node: NodeId) -> Result<(), InstrumentError> {
    let Resource::QueueTrigger(trigger) = ctx.topology.node(node).resource() else {
        return Ok(());
    };
    let (queue_arn, function_name) = (trigger.queue_arn.clone(), trigger.function_name.clone());

    let queue = ctx
        .topology
        .find(|n| matches!(n.resource(), Resource::Queue(q) if q.arn == queue_arn));
    let function = ctx.topology.find(|n| {
        n.resource()
            .as_function()
            .is_some_and(|f| f.function_name == function_name)
    });
    let (Some(queue), Some(function)) = (queue, function) else {
        debug!(
            trigger = %ctx.topology.path(node),
            queue = %queue_arn,
            function = %function_name,
            "Queue trigger does not resolve, skipping"
        );
        return Ok(());
    };

    let key = ServiceKey::new(ServiceKind::Queue, [ctx.name_of(queue)]);
    let already_routed = ctx
        .pool
        .get(EndpointId::PRIMARY)
        .routing
        .get(&queue_arn)
        .is_some_and(|existing| *existing == key);
    if !already_routed {
        ctx.route(EndpointId::PRIMARY, &queue_arn, key.clone())?;
    }
    if let Some(function) = ctx.function_mut(function) {
        function.set_env(env::SUBSCRIBED_TO_QUEUE, "true");
    }
    debug!(%key, "Instrumented queue trigger");
    Ok(())
}

fn topic(ctx: &mut BuildContext<'_>, node: NodeId) -> Result<(), InstrumentError> {
    let Resource::Topic(topic) = ctx.topology.node(node).resource() else {
        return Ok(());
    };
    let arn = topic.arn.clone();
    let name = ctx.name_of(node);

    let endpoint = ctx.acquire_endpoint(Some(&|e: &ForwardingEndpoint| !e.is_subscribed_to(&arn)))?;
    ctx.subscribe(endpoint, &arn, &name, None)?;

    let key = ServiceKey::new(ServiceKind::Topic, [name]);
    debug!(%key, %endpoint, "Instrumented topic");
    ctx.route(endpoint, &arn, key)
}

fn topic_subscription(ctx: &mut BuildContext<'_>, node: NodeId) -> Result<(), InstrumentError> {
    let subscription = ctx.topology.node(node);
    let Resource::TopicSubscription(resource) = subscription.resource() else {
        return Ok(());
    };
    let Some(target) = subscription.parent() else {
        debug!(subscription = %ctx.topology.path(node), "Subscription has no parent, skipping");
        return Ok(());
    };
    let topic_arn = resource.topic_arn.clone();
    let filter_policy = resource.filter_policy.clone();

    let topic = ctx
        .topology
        .find(|n| matches!(n.resource(), Resource::Topic(t) if t.arn == topic_arn))
        .ok_or_else(|| InstrumentError::TopicNotFound {
            subscription: ctx.topology.path(node),
            topic_arn: topic_arn.clone(),
        })?;
    let topic_name = ctx.name_of(topic);
    let target_name = ctx.name_of(target);

    let endpoint = ctx.acquire_endpoint(Some(&|e: &ForwardingEndpoint| !e.is_subscribed_to(&topic_arn)))?;
    ctx.subscribe(endpoint, &topic_arn, &topic_name, filter_policy)?;

    let key = ServiceKey::new(ServiceKind::TopicSubscription, [topic_name, target_name]);
    debug!(%key, %endpoint, "Instrumented topic subscription");
    ctx.route(endpoint, &topic_arn, key)
}

fn object_store(ctx: &mut BuildContext<'_>, node: NodeId) -> Result<(), InstrumentError> {
    let name = ctx.name_of(node);
    let primary = ctx.pool.get(EndpointId::PRIMARY).function_name.clone();

    let Resource::ObjectStore(store) = ctx.topology.resource_mut(node) else {
        return Ok(());
    };
    store.notifications.push(Notification {
        event: OBJECT_CREATED_EVENT.to_owned(),
        target: primary,
    });
    let arn = store.arn.clone();

    let key = ServiceKey::new(ServiceKind::ObjectStore, [name]);
    debug!(%key, "Instrumented object store");
    ctx.route(EndpointId::PRIMARY, &arn, key)
}

fn table(ctx: &mut BuildContext<'_>, node: NodeId) -> Result<(), InstrumentError> {
    let name = ctx.name_of(node);

    let Resource::Table(table) = ctx.topology.resource_mut(node) else {
        return Ok(());
    };
    table.stream = Some(StreamView::NewAndOldImages);
    let arn = table.arn.clone();

    if let Some(primary) = ctx.endpoint_function_mut(EndpointId::PRIMARY) {
        primary.event_sources.push(EventSourceMapping {
            source_arn: arn.clone(),
            batch_size: 1,
            retry_attempts: 0,
            starting_position: StartingPosition::Latest,
        });
    }

    let key = ServiceKey::new(ServiceKind::Table, [name]);
    debug!(%key, "Instrumented table");
    ctx.route(EndpointId::PRIMARY, &arn, key)
}

fn event_bus(ctx: &mut BuildContext<'_>, node: NodeId) -> Result<(), InstrumentError> {
    let Resource::EventBus(bus) = ctx.topology.node(node).resource() else {
        return Ok(());
    };
    let bus_name = bus.name.clone();
    let name = ctx.name_of(node);

    let endpoint = ctx.acquire_endpoint(Some(&unbound))?;
    let forwarding = ctx.pool.get_mut(endpoint);
    forwarding.bound_to_event_bus = true;
    let target = forwarding.function_name.clone();

    let group = ctx.group();
    ctx.topology.add_owned(
        group,
        format!("RuleAll{}", flatten_name(&name)),
        Resource::EventRule(EventRuleResource {
            bus_name,
            pattern: Some(catch_all_pattern()),
            targets: vec![target],
        }),
    )?;

    let key = ServiceKey::new(ServiceKind::EventBus, [name]);
    debug!(%key, %endpoint, "Instrumented event bus");
    ctx.route(endpoint, EVENT_BUS_ROUTE, key)
}

fn event_rule(ctx: &mut BuildContext<'_>, node: NodeId) -> Result<(), InstrumentError> {
    let Resource::EventRule(rule) = ctx.topology.node(node).resource() else {
        return Ok(());
    };
    let bus_name = rule.bus_name.clone();

    let bus = ctx
        .topology
        .find(|n| matches!(n.resource(), Resource::EventBus(b) if b.name == bus_name))
        .ok_or_else(|| InstrumentError::EventBusNotFound {
            rule: ctx.topology.path(node),
            bus_name: bus_name.clone(),
        })?;
    let bus_display = ctx.name_of(bus);
    let rule_name = ctx.name_of(node);

    let endpoint = ctx.acquire_endpoint(Some(&unbound))?;
    let forwarding = ctx.pool.get_mut(endpoint);
    forwarding.bound_to_event_bus = true;
    let target = forwarding.function_name.clone();

    if let Resource::EventRule(rule) = ctx.topology.resource_mut(node) {
        rule.targets.push(target);
    }

    let key = ServiceKey::new(ServiceKind::EventRule, [bus_display, rule_name]);
    debug!(%key, %endpoint, "Instrumented event rule");
    ctx.route(endpoint, EVENT_BUS_ROUTE, key)
}
