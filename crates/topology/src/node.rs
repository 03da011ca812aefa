use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use api_types::attr;
use api_types::AttrValue;
use api_types::NodeType;
use api_types::Status;

/// Identifier of a node, unique within a graph.
///
/// Ids are derived from the node kind and its hardware index, so the same
/// hardware always maps to the same id across collection cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn socket(socket_id: u32) -> Self {
        Self(format!("socket-{socket_id}"))
    }

    pub fn numa(numa_node_id: u32) -> Self {
        Self(format!("numa-{numa_node_id}"))
    }

    pub fn core_group(numa_node_id: u32, group_index: u32) -> Self {
        Self(format!("coregroup-{numa_node_id}-{group_index}"))
    }

    pub fn core(core_id: u32) -> Self {
        Self(format!("core-{core_id}"))
    }

    pub fn gpu(index: u32) -> Self {
        Self(format!("gpu-{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A vertex in the topology tree.
///
/// `children` mirrors the outgoing `contains` edges of the node and is only
/// ever extended by [`crate::Graph::add_edge`].
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    node_type: NodeType,
    attributes: BTreeMap<String, AttrValue>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn new(id: NodeId, node_type: NodeType) -> Self {
        Self {
            id,
            node_type,
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Builder style attribute setter, used for nodes created outside the graph.
    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttrValue> {
        &self.attributes
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn status(&self) -> Option<Status> {
        self.attr(attr::STATUS).and_then(AttrValue::as_status)
    }

    pub fn is_free(&self) -> bool {
        self.status() == Some(Status::Free)
    }

    pub(crate) fn push_child(&mut self, child: NodeId) {
        self.children.push(child);
    }

    pub(crate) fn mark_used(&mut self, workload: &str) {
        self.attributes.remove(attr::ALLOCATED_TO);
        self.set_attr(attr::STATUS, Status::Used);
        self.set_attr(attr::USED_BY, workload);
    }

    pub(crate) fn mark_allocated(&mut self, workload: &str) {
        self.attributes.remove(attr::USED_BY);
        self.set_attr(attr::STATUS, Status::Allocated);
        self.set_attr(attr::ALLOCATED_TO, workload);
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn ids_are_derived_from_kind_and_index() {
        assert_eq!(NodeId::socket(1).as_str(), "socket-1");
        assert_eq!(NodeId::numa(7).as_str(), "numa-7");
        assert_eq!(NodeId::core_group(3, 0).as_str(), "coregroup-3-0");
        assert_eq!(NodeId::core(31).as_str(), "core-31");
        assert_eq!(NodeId::gpu(2).to_string(), "gpu-2");
    }

    #[test]
    fn used_and_allocated_are_exclusive() {
        let mut node =
            Node::new(NodeId::core(0), NodeType::CpuCore).with_attr(attr::STATUS, Status::Free);
        assert!(node.is_free());

        node.mark_allocated("default/pod-a");
        assert_eq!(node.status(), Some(Status::Allocated));
        assert_eq!(
            node.attr(attr::ALLOCATED_TO).and_then(AttrValue::as_str),
            Some("default/pod-a")
        );

        node.mark_used("default/pod-b");
        assert_eq!(node.status(), Some(Status::Used));
        assert_eq!(node.attr(attr::ALLOCATED_TO), None);
        assert_eq!(
            node.attr(attr::USED_BY).and_then(AttrValue::as_str),
            Some("default/pod-b")
        );
    }
}
