use std::collections::btree_map;
use std::collections::hash_map::Entry;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt;

use api_types::EdgeType;
use api_types::NodeType;
use api_types::Status;
use tracing::warn;

use crate::edge::Edge;
use crate::error::GraphError;
use crate::node::Node;
use crate::node::NodeId;

/// Number of logical cores per core group when nothing else is configured.
pub const DEFAULT_CORE_GROUP_SIZE: u32 = 8;

/// Hierarchical model of a machine's compute hardware.
///
/// The graph owns every node and edge. Nodes are kept in discovery order,
/// which the allocator relies on for deterministic placement. A graph is
/// built once per collection cycle and is not meant to be shared between
/// threads while it is being mutated.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    order: Vec<NodeId>,
    edges: BTreeSet<Edge>,
    core_group_size: u32,
}

impl Graph {
    /// Creates an empty graph.
    ///
    /// # Errors
    ///
    /// - [`GraphError::InvalidCoreGroupSize`] if `core_group_size` is zero
    pub fn new(core_group_size: u32) -> Result<Self, GraphError> {
        if core_group_size == 0 {
            return Err(GraphError::InvalidCoreGroupSize(core_group_size));
        }

        Ok(Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: BTreeSet::new(),
            core_group_size,
        })
    }

    pub fn core_group_size(&self) -> u32 {
        self.core_group_size
    }

    /// Returns the node with `id`, creating an attribute-less node of
    /// `node_type` if it does not exist yet.
    ///
    /// An existing node is returned unchanged even if its type differs.
    pub fn get_or_create(&mut self, id: NodeId, node_type: NodeType) -> &mut Node {
        match self.nodes.entry(id) {
            Entry::Occupied(entry) => {
                let node = entry.into_mut();
                if node.node_type() != node_type {
                    warn!(
                        node_id = %node.id(),
                        existing = %node.node_type(),
                        requested = %node_type,
                        "Node already exists with a different type"
                    );
                }
                node
            }
            Entry::Vacant(entry) => {
                let id = entry.key().clone();
                self.order.push(id.clone());
                entry.insert(Node::new(id, node_type))
            }
        }
    }

    /// Inserts a prebuilt node, keeping the existing one if the id is taken.
    ///
    /// Children of the inserted node are discarded: they are derived from
    /// edges only.
    pub fn add_node(&mut self, node: Node) -> &mut Node {
        match self.nodes.entry(node.id().clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let id = entry.key().clone();
                self.order.push(id.clone());
                let mut fresh = Node::new(id, node.node_type());
                for (key, value) in node.attributes() {
                    fresh.set_attr(key, value.clone());
                }
                entry.insert(fresh)
            }
        }
    }

    /// Adds an edge, returning `false` if it already existed.
    ///
    /// A new `contains` edge appends `target` to the children of `source`.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnknownNode`] if either endpoint is not in the graph
    pub fn add_edge(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        edge_type: EdgeType,
    ) -> Result<bool, GraphError> {
        for id in [source, target] {
            if !self.nodes.contains_key(id) {
                return Err(GraphError::UnknownNode { id: id.to_string() });
            }
        }

        let edge = Edge::new(source.clone(), target.clone(), edge_type);
        if !self.edges.insert(edge) {
            return Ok(false);
        }

        match edge_type {
            EdgeType::Contains => {
                if let Some(parent) = self.nodes.get_mut(source) {
                    parent.push_child(target.clone());
                }
            }
        }

        Ok(true)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Iterates over all nodes in discovery order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Iterates over the nodes of one type in discovery order.
    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes().filter(move |node| node.node_type() == node_type)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn edges_from<'a>(
        &'a self,
        source: &'a str,
        edge_type: EdgeType,
    ) -> impl Iterator<Item = &'a Edge> {
        self.edges
            .iter()
            .filter(move |edge| edge.source.as_str() == source && edge.edge_type == edge_type)
    }

    pub fn edges_to<'a>(
        &'a self,
        target: &'a str,
        edge_type: EdgeType,
    ) -> impl Iterator<Item = &'a Edge> {
        self.edges
            .iter()
            .filter(move |edge| edge.target.as_str() == target && edge.edge_type == edge_type)
    }

    /// Iterates over the children of `id` in the order they were attached.
    pub fn children<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .get(id)
            .map(|node| node.children())
            .unwrap_or_default()
            .iter()
            .filter_map(|child| self.nodes.get(child))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Counts nodes per type and cores/GPUs per status.
    pub fn summary(&self) -> TopologySummary {
        let mut summary = TopologySummary::default();
        for node in self.nodes() {
            *summary.node_counts.entry(node.node_type()).or_default() += 1;
            let status_counts = match node.node_type() {
                NodeType::CpuCore => &mut summary.cores,
                NodeType::Gpu => &mut summary.gpus,
                _ => continue,
            };
            match node.status() {
                Some(Status::Free) => status_counts.free += 1,
                Some(Status::Used) => status_counts.used += 1,
                Some(Status::Allocated) => status_counts.allocated += 1,
                None => {}
            }
        }
        summary
    }
}

/// Occupancy counters for one kind of device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub free: usize,
    pub used: usize,
    pub allocated: usize,
}

/// Per-type node counts and per-status device counts of a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySummary {
    node_counts: BTreeMap<NodeType, usize>,
    pub cores: StatusCounts,
    pub gpus: StatusCounts,
}

impl TopologySummary {
    pub fn count(&self, node_type: NodeType) -> usize {
        self.node_counts.get(&node_type).copied().unwrap_or(0)
    }

    pub fn node_counts(&self) -> btree_map::Iter<'_, NodeType, usize> {
        self.node_counts.iter()
    }
}

impl fmt::Display for TopologySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sockets, {} NUMA nodes, {} core groups, {} cores ({} free, {} used, {} allocated), {} GPUs ({} free, {} used, {} allocated)",
            self.count(NodeType::Socket),
            self.count(NodeType::NumaNode),
            self.count(NodeType::CoreGroup),
            self.count(NodeType::CpuCore),
            self.cores.free,
            self.cores.used,
            self.cores.allocated,
            self.count(NodeType::Gpu),
            self.gpus.free,
            self.gpus.used,
            self.gpus.allocated,
        )
    }
}

#[cfg(test)]
mod tests {
    use api_types::attr;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn zero_core_group_size_is_rejected() {
        assert_eq!(
            Graph::new(0).unwrap_err(),
            GraphError::InvalidCoreGroupSize(0)
        );
        assert!(Graph::new(1).is_ok());
    }

    #[test]
    fn get_or_create_returns_existing_node() {
        let mut graph = Graph::new(DEFAULT_CORE_GROUP_SIZE).unwrap();

        graph
            .get_or_create(NodeId::socket(0), NodeType::Socket)
            .set_attr(attr::NAME, "package-0");
        let again = graph.get_or_create(NodeId::socket(0), NodeType::Socket);

        assert_eq!(
            again.attr(attr::NAME).and_then(|v| v.as_str()),
            Some("package-0")
        );
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn duplicate_edges_are_ignored() {
        let mut graph = Graph::new(DEFAULT_CORE_GROUP_SIZE).unwrap();
        let socket = NodeId::socket(0);
        let numa = NodeId::numa(0);
        graph.get_or_create(socket.clone(), NodeType::Socket);
        graph.get_or_create(numa.clone(), NodeType::NumaNode);

        assert!(graph.add_edge(&socket, &numa, EdgeType::Contains).unwrap());
        assert!(!graph.add_edge(&socket, &numa, EdgeType::Contains).unwrap());

        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.node("socket-0").unwrap().children().to_vec(), vec![numa]);
        assert_eq!(graph.children("socket-0").count(), 1);
        assert_eq!(graph.edges_to("numa-0", EdgeType::Contains).count(), 1);
    }

    #[test]
    fn edges_require_existing_endpoints() {
        let mut graph = Graph::new(DEFAULT_CORE_GROUP_SIZE).unwrap();
        let socket = NodeId::socket(0);
        graph.get_or_create(socket.clone(), NodeType::Socket);

        let err = graph
            .add_edge(&socket, &NodeId::numa(9), EdgeType::Contains)
            .unwrap_err();

        assert_eq!(
            err,
            GraphError::UnknownNode {
                id: "numa-9".to_string()
            }
        );
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.node("socket-0").unwrap().children().is_empty());
    }

    #[test]
    fn add_node_keeps_first_instance() {
        let mut graph = Graph::new(DEFAULT_CORE_GROUP_SIZE).unwrap();
        graph.add_node(Node::new(NodeId::gpu(0), NodeType::Gpu).with_attr(attr::UUID, "GPU-a"));
        graph.add_node(Node::new(NodeId::gpu(0), NodeType::Gpu).with_attr(attr::UUID, "GPU-b"));

        assert_eq!(graph.len(), 1);
        assert_eq!(
            graph.node("gpu-0").unwrap().attr(attr::UUID).and_then(|v| v.as_str()),
            Some("GPU-a")
        );
    }

    #[test]
    fn nodes_iterate_in_discovery_order() {
        let mut graph = Graph::new(DEFAULT_CORE_GROUP_SIZE).unwrap();
        for core in [5, 1, 3] {
            graph.get_or_create(NodeId::core(core), NodeType::CpuCore);
        }
        graph.get_or_create(NodeId::gpu(0), NodeType::Gpu);

        let ids: Vec<&str> = graph
            .nodes_of_type(NodeType::CpuCore)
            .map(|node| node.id().as_str())
            .collect();
        assert_eq!(ids, vec!["core-5", "core-1", "core-3"]);
    }
}
