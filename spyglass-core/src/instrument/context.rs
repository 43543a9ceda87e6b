use std::collections::HashSet;

use serde_json::Value;
use spyglass_sdk::{ServiceKey, env};
use tracing::debug;

use super::{InstrumentError, InstrumenterSettings};
use crate::pool::{Eligibility, EndpointId, ForwardingEndpoint, SubscriptionPool};
use crate::registry::ServiceKeyRegistry;
use crate::topology::{FunctionResource, NodeId, Resource, SubscriptionResource, Topology};

/// Mutable state of one instrumentation pass.
///
/// Handlers receive it by reference; nothing about a pass lives anywhere
/// else.
pub struct BuildContext<'s> {
    pub topology: Topology,
    pub pool: SubscriptionPool,
    pub registry: ServiceKeyRegistry,
    pub settings: &'s InstrumenterSettings,
    group: NodeId,
    instrumented: HashSet<NodeId>,
}

impl<'s> BuildContext<'s> {
    /// Inject the instrumenter's group under the root and create the
    /// primary endpoint.
    pub fn new(
        mut topology: Topology,
        settings: &'s InstrumenterSettings,
    ) -> Result<Self, InstrumentError> {
        let root = topology.root();
        let group = topology.add_owned(root, settings.group_name.clone(), Resource::Group)?;

        let mut context = Self {
            topology,
            pool: SubscriptionPool::new(),
            registry: ServiceKeyRegistry::new(),
            settings,
            group,
            instrumented: HashSet::new(),
        };
        context.acquire_endpoint(None)?;
        Ok(context)
    }

    pub fn group(&self) -> NodeId {
        self.group
    }

    /// Record `node` as handled. Returns `false` if it already was.
    pub fn mark_instrumented(&mut self, node: NodeId) -> bool {
        self.instrumented.insert(node)
    }

    /// Whether the walk must skip `node` and its subtree.
    pub fn is_skipped(&self, node: NodeId) -> bool {
        self.topology.node(node).is_owned() || self.pool.contains_node(node)
    }

    /// Name used in service keys: the path relative to the root, or the
    /// root's own name for the root itself.
    pub fn name_of(&self, node: NodeId) -> String {
        let relative = self.topology.relative_name(node);
        if relative.is_empty() {
            self.topology.node(node).name().to_owned()
        } else {
            relative
        }
    }

    pub fn acquire_endpoint(
        &mut self,
        eligible: Option<Eligibility<'_>>,
    ) -> Result<EndpointId, InstrumentError> {
        let Self {
            topology,
            pool,
            settings,
            group,
            ..
        } = self;

        pool.acquire::<InstrumentError>(eligible, |id| {
            let node_name = format!("Subscription{}", id.index());
            let function_name = format!("{}{}", settings.group_name, node_name);
            let node = topology.add_owned(
                *group,
                node_name,
                Resource::Function(FunctionResource::new(function_name.clone())),
            )?;
            debug!(endpoint = %id, function = %function_name, "Created forwarding endpoint");
            Ok(ForwardingEndpoint::new(node, function_name))
        })
    }

    /// Function properties of `node`, if it is a function.
    pub fn function_mut(&mut self, node: NodeId) -> Option<&mut FunctionResource> {
        self.topology.resource_mut(node).as_function_mut()
    }

    pub fn endpoint_function_mut(&mut self, endpoint: EndpointId) -> Option<&mut FunctionResource> {
        let node = self.pool.get(endpoint).node;
        self.function_mut(node)
    }

    pub fn register(&mut self, key: ServiceKey) -> Result<(), InstrumentError> {
        self.registry.register(key)?;
        Ok(())
    }

    /// Register `key` and route `identity` to it on `endpoint`.
    pub fn route(
        &mut self,
        endpoint: EndpointId,
        identity: &str,
        key: ServiceKey,
    ) -> Result<(), InstrumentError> {
        self.registry.register(key.clone())?;
        let endpoint = self.pool.get_mut(endpoint);
        endpoint
            .routing
            .insert(identity, key)
            .map_err(|source| InstrumentError::DuplicateRoute {
                endpoint: endpoint.function_name.clone(),
                source,
            })
    }

    /// Subscribe `endpoint` to a topic through an owned subscription node
    /// placed under the endpoint.
    pub fn subscribe(
        &mut self,
        endpoint: EndpointId,
        topic_arn: &str,
        topic_name: &str,
        filter_policy: Option<Value>,
    ) -> Result<NodeId, InstrumentError> {
        let forwarding = self.pool.get_mut(endpoint);
        forwarding.subscribed_topics.insert(topic_arn.to_owned());
        let parent = forwarding.node;
        let resource = Resource::TopicSubscription(SubscriptionResource {
            topic_arn: topic_arn.to_owned(),
            endpoint: forwarding.function_name.clone(),
            filter_policy,
        });

        let node = self.topology.add_owned(
            parent,
            format!("{}Subscription", flatten_name(topic_name)),
            resource,
        )?;
        Ok(node)
    }

    /// Write every endpoint's routing table and the channel address into
    /// the endpoint's environment.
    pub fn finish(mut self) -> Result<super::Instrumentation, InstrumentError> {
        let mut tables = Vec::with_capacity(self.pool.len());
        for (id, endpoint) in self.pool.iter() {
            tables.push((id, endpoint.routing.to_json()?));
        }

        let channel = self.settings.channel_address.clone();
        for (id, routing) in tables {
            if let Some(function) = self.endpoint_function_mut(id) {
                function.set_env(env::ROUTING_TABLE, routing);
                function.set_env(env::CHANNEL_ENDPOINT, channel.clone());
            }
        }

        Ok(super::Instrumentation {
            topology: self.topology,
            pool: self.pool,
            registry: self.registry,
            group: self.group,
        })
    }
}

/// Relative names contain path separators; node names may not.
///
/// `_` becomes `__` and the separator becomes `_S`, so distinct paths
/// always flatten to distinct names. Names without either stay as they are.
pub(crate) fn flatten_name(name: &str) -> String {
    let mut flat = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '_' => flat.push_str("__"),
            crate::topology::PATH_SEPARATOR => flat.push_str("_S"),
            c => flat.push(c),
        }
    }
    flat
}
