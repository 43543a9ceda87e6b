//! Forwarding endpoint pool.
//!
//! Each [`ForwardingEndpoint`] is shared by many resources. Two constraints
//! bound that sharing: an endpoint may be subscribed to a given topic at
//! most once, and an endpoint may be bound to at most one event bus. When
//! no existing endpoint satisfies a caller's constraint, the pool grows.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use spyglass_sdk::ServiceKey;

use crate::topology::NodeId;

/// Errors produced when adding a route.
#[derive(Debug, thiserror::Error)]
#[error("identity {identity:?} is already routed to {existing}, cannot route it to {rejected}")]
pub struct RoutingError {
    pub identity: String,
    pub existing: ServiceKey,
    pub rejected: ServiceKey,
}

/// Resource identity → service key, for one endpoint.
///
/// Serializes as a flat JSON object of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingTable(BTreeMap<String, ServiceKey>);

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. Identities are never rebound.
    pub fn insert(
        &mut self,
        identity: impl Into<String>,
        key: ServiceKey,
    ) -> Result<(), RoutingError> {
        let identity = identity.into();
        if let Some(existing) = self.0.get(&identity) {
            return Err(RoutingError {
                identity,
                existing: existing.clone(),
                rejected: key,
            });
        }
        self.0.insert(identity, key);
        Ok(())
    }

    pub fn get(&self, identity: &str) -> Option<&ServiceKey> {
        self.0.get(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceKey)> {
        self.0.iter().map(|(identity, key)| (identity.as_str(), key))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Position of an endpoint in its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(usize);

impl EndpointId {
    /// The endpoint created with the pool.
    pub const PRIMARY: EndpointId = EndpointId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ForwardingEndpoint {
    pub node: NodeId,
    pub function_name: String,
    pub routing: RoutingTable,
    pub bound_to_event_bus: bool,
    pub subscribed_topics: BTreeSet<String>,
}

impl ForwardingEndpoint {
    pub fn new(node: NodeId, function_name: impl Into<String>) -> Self {
        Self {
            node,
            function_name: function_name.into(),
            routing: RoutingTable::new(),
            bound_to_event_bus: false,
            subscribed_topics: BTreeSet::new(),
        }
    }

    pub fn is_subscribed_to(&self, topic_arn: &str) -> bool {
        self.subscribed_topics.contains(topic_arn)
    }
}

/// Eligibility test for [`SubscriptionPool::acquire`].
pub type Eligibility<'a> = &'a dyn Fn(&ForwardingEndpoint) -> bool;

#[derive(Debug, Clone, Default)]
pub struct SubscriptionPool {
    endpoints: Vec<ForwardingEndpoint>,
}

impl SubscriptionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the first endpoint accepted by `eligible` (or simply the
    /// first endpoint when there is no predicate). Otherwise create one
    /// through `create`, which receives the id the new endpoint will get.
    pub fn acquire<E>(
        &mut self,
        eligible: Option<Eligibility<'_>>,
        create: impl FnOnce(EndpointId) -> Result<ForwardingEndpoint, E>,
    ) -> Result<EndpointId, E> {
        let found = match eligible {
            Some(eligible) => self.endpoints.iter().position(|e| eligible(e)),
            None if !self.endpoints.is_empty() => Some(0),
            None => None,
        };
        if let Some(index) = found {
            return Ok(EndpointId(index));
        }

        let id = EndpointId(self.endpoints.len());
        let endpoint = create(id)?;
        self.endpoints.push(endpoint);
        Ok(id)
    }

    /// Endpoint by id. Ids are only minted by this pool.
    pub fn get(&self, id: EndpointId) -> &ForwardingEndpoint {
        &self.endpoints[id.0]
    }

    pub fn get_mut(&mut self, id: EndpointId) -> &mut ForwardingEndpoint {
        &mut self.endpoints[id.0]
    }

    pub fn primary(&self) -> Option<&ForwardingEndpoint> {
        self.endpoints.first()
    }

    /// Whether `node` is one of the pool's endpoints.
    pub fn contains_node(&self, node: NodeId) -> bool {
        self.endpoints.iter().any(|e| e.node == node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EndpointId, &ForwardingEndpoint)> {
        self.endpoints
            .iter()
            .enumerate()
            .map(|(i, e)| (EndpointId(i), e))
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Routing tables of every endpoint, keyed by endpoint function name,
/// and the observed functions whose events the relay accepts.
///
/// This is the document the relay loads to resolve forwarded events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDocument {
    endpoints: BTreeMap<String, RoutingTable>,
    #[serde(default)]
    functions: BTreeSet<String>,
}

impl RoutingDocument {
    pub fn from_pool(pool: &SubscriptionPool) -> Self {
        Self {
            endpoints: pool
                .iter()
                .map(|(_, e)| (e.function_name.clone(), e.routing.clone()))
                .collect(),
            functions: BTreeSet::new(),
        }
    }

    /// Add observed function names, as they appear in function keys.
    pub fn with_functions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.functions.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn table(&self, endpoint: &str) -> Option<&RoutingTable> {
        self.endpoints.get(endpoint)
    }

    pub fn knows_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Resource, Topology};
    use spyglass_sdk::ServiceKind;
    use std::convert::Infallible;

    fn pool_with(topology: &mut Topology, count: usize) -> SubscriptionPool {
        let mut pool = SubscriptionPool::new();
        for i in 0..count {
            let node = topology
                .add(topology.root(), format!("E{i}"), Resource::Group)
                .unwrap();
            pool.endpoints.push(ForwardingEndpoint::new(node, format!("e{i}")));
        }
        pool
    }

    #[test]
    fn test_acquire_without_predicate_returns_first() {
        let mut topology = Topology::new("S");
        let mut pool = pool_with(&mut topology, 2);
        let id = pool
            .acquire::<Infallible>(None, |_| unreachable!("pool is not empty"))
            .unwrap();
        assert_eq!(id, EndpointId::PRIMARY);
    }

    #[test]
    fn test_acquire_grows_when_nothing_is_eligible() {
        let mut topology = Topology::new("S");
        let mut pool = pool_with(&mut topology, 1);
        pool.get_mut(EndpointId::PRIMARY).bound_to_event_bus = true;

        let unbound: Eligibility<'_> = &|e| !e.bound_to_event_bus;
        let node = topology.add(topology.root(), "E1", Resource::Group).unwrap();
        let id = pool
            .acquire::<Infallible>(Some(unbound), |id| {
                assert_eq!(id.index(), 1);
                Ok(ForwardingEndpoint::new(node, "e1"))
            })
            .unwrap();
        assert_eq!(id.index(), 1);
        assert_eq!(pool.len(), 2);
        assert!(pool.contains_node(node));

        // The new endpoint is now the first eligible one.
        let again = pool
            .acquire::<Infallible>(Some(unbound), |_| unreachable!("endpoint 1 is eligible"))
            .unwrap();
        assert_eq!(again, id);
    }

    #[test]
    fn test_routing_table_rejects_rebinding() {
        let mut table = RoutingTable::new();
        let a = ServiceKey::new(ServiceKind::Topic, ["A"]);
        let b = ServiceKey::new(ServiceKind::Topic, ["B"]);
        table.insert("arn:topic/A", a.clone()).unwrap();
        let err = table.insert("arn:topic/A", b).unwrap_err();
        assert_eq!(err.existing, a);
        assert_eq!(table.len(), 1);
        assert_eq!(table.to_json().unwrap(), r#"{"arn:topic/A":"Topic#A"}"#);
    }
}
