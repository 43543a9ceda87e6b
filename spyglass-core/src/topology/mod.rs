//! Resource topology.
//!
//! A [`Topology`] is an arena of named nodes forming a tree. Every node has
//! a stable structural path (`Root/Orders/Handler`) and a [`Resource`]
//! describing what it is. Nodes added by the instrumenter are flagged as
//! owned so later walks can recognise and skip them.

mod description;
mod resource;

pub use description::TopologySpec;
pub use resource::{
    Capability, EventBusResource, EventRuleResource, EventSourceMapping, FunctionResource,
    Notification, ObjectStoreResource, QueueResource, QueueTriggerResource, Resource,
    StartingPosition, StreamView, SubscriptionResource, TableResource, TopicResource,
};

use spyglass_sdk::ServiceKey;
use std::fmt;

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '/';

/// Errors produced while building a topology.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("invalid node name {0:?}: names must be non-empty and must not contain '/'")]
    InvalidName(String),

    #[error("invalid node name {name:?}: {reserved:?} separates service key segments")]
    ReservedCharacter { name: String, reserved: char },

    #[error("{parent} already has a child named {name:?}")]
    DuplicateName { parent: String, name: String },
}

/// Index of a node inside the [`Topology`] that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    resource: Resource,
    owned: bool,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Whether the instrumenter created this node.
    pub fn is_owned(&self) -> bool {
        self.owned
    }
}

#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<Node>,
}

impl Topology {
    /// A topology holding only its root group.
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            nodes: vec![Node {
                name: root_name.into(),
                parent: None,
                children: Vec::new(),
                resource: Resource::Group,
                owned: false,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Add a node under `parent`. Sibling names must be unique.
    pub fn add(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        resource: Resource,
    ) -> Result<NodeId, TopologyError> {
        self.insert(parent, name.into(), resource, false)
    }

    /// Add a node owned by the instrumenter.
    pub(crate) fn add_owned(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        resource: Resource,
    ) -> Result<NodeId, TopologyError> {
        self.insert(parent, name.into(), resource, true)
    }

    fn insert(
        &mut self,
        parent: NodeId,
        name: String,
        resource: Resource,
        owned: bool,
    ) -> Result<NodeId, TopologyError> {
        if name.is_empty() || name.contains(PATH_SEPARATOR) {
            return Err(TopologyError::InvalidName(name));
        }
        if name.contains(ServiceKey::SEPARATOR) {
            return Err(TopologyError::ReservedCharacter {
                name,
                reserved: ServiceKey::SEPARATOR,
            });
        }
        if self.find_child(parent, &name).is_some() {
            return Err(TopologyError::DuplicateName {
                parent: self.path(parent),
                name,
            });
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name,
            parent: Some(parent),
            children: Vec::new(),
            resource,
            owned,
        });
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Node by id. Ids are only minted by this topology.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn resource_mut(&mut self, id: NodeId) -> &mut Resource {
        &mut self.nodes[id.0].resource
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|child| self.node(*child).name == name)
    }

    /// First node, in insertion order, matching `predicate`.
    pub fn find(&self, mut predicate: impl FnMut(&Node) -> bool) -> Option<NodeId> {
        self.nodes.iter().position(|n| predicate(n)).map(NodeId)
    }

    /// Resolve a path relative to the root, e.g. `"Orders/Handler"`.
    pub fn lookup(&self, relative: &str) -> Option<NodeId> {
        relative
            .split(PATH_SEPARATOR)
            .try_fold(self.root(), |at, segment| self.find_child(at, segment))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Full structural path including the root name.
    pub fn path(&self, id: NodeId) -> String {
        self.segments(id).join(&PATH_SEPARATOR.to_string())
    }

    /// Path with the root name stripped. This is the name used in
    /// service keys.
    pub fn relative_name(&self, id: NodeId) -> String {
        let segments = self.segments(id);
        segments
            .get(1..)
            .unwrap_or_default()
            .join(&PATH_SEPARATOR.to_string())
    }

    fn segments(&self, id: NodeId) -> Vec<&str> {
        let mut segments = Vec::new();
        let mut at = Some(id);
        while let Some(current) = at {
            let node = self.node(current);
            segments.push(node.name.as_str());
            at = node.parent;
        }
        segments.reverse();
        segments
    }
}
