//! JSON topology description.
//!
//! ```json
//! {
//!   "name": "Stack",
//!   "children": [
//!     {"name": "F", "resource": {"kind": "function", "functionName": "stack-f"}},
//!     {"name": "T", "resource": {"kind": "table", "arn": "arn:table/T"}}
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use super::{NodeId, Resource, Topology, TopologyError};

/// Serializable tree form of a [`Topology`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySpec {
    pub name: String,
    #[serde(default = "group")]
    pub resource: Resource,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub owned: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TopologySpec>,
}

fn group() -> Resource {
    Resource::Group
}

impl Topology {
    /// Build a topology from its description. The root's resource is
    /// ignored; roots are always groups.
    pub fn from_spec(spec: &TopologySpec) -> Result<Self, TopologyError> {
        let mut topology = Topology::new(spec.name.clone());
        let root = topology.root();
        topology.add_children(root, &spec.children)?;
        Ok(topology)
    }

    fn add_children(
        &mut self,
        parent: NodeId,
        children: &[TopologySpec],
    ) -> Result<(), TopologyError> {
        for child in children {
            let id = self.insert(parent, child.name.clone(), child.resource.clone(), child.owned)?;
            self.add_children(id, &child.children)?;
        }
        Ok(())
    }

    pub fn to_spec(&self) -> TopologySpec {
        self.describe(self.root())
    }

    fn describe(&self, id: NodeId) -> TopologySpec {
        let node = self.node(id);
        TopologySpec {
            name: node.name().to_owned(),
            resource: node.resource().clone(),
            owned: node.is_owned(),
            children: node
                .children()
                .iter()
                .map(|child| self.describe(*child))
                .collect(),
        }
    }
}
