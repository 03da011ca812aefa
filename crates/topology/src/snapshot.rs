//! Conversion between the in-memory graph and the flattened `FlexTopo` spec.

use api_types::FlexTopoEdge;
use api_types::FlexTopoNode;
use api_types::FlexTopoSpec;

use crate::error::GraphError;
use crate::graph::Graph;
use crate::node::Node;
use crate::node::NodeId;

impl Graph {
    /// Flattens the graph into node and edge lists.
    ///
    /// Consumers must not rely on the order of either list.
    pub fn to_spec(&self) -> FlexTopoSpec {
        let nodes = self
            .nodes()
            .map(|node| FlexTopoNode {
                id: node.id().to_string(),
                node_type: node.node_type(),
                attributes: node.attributes().clone(),
            })
            .collect();

        let edges = self
            .edges()
            .map(|edge| FlexTopoEdge {
                source: edge.source.to_string(),
                target: edge.target.to_string(),
                edge_type: edge.edge_type,
            })
            .collect();

        FlexTopoSpec { nodes, edges }
    }

    /// Rebuilds a graph from a flattened spec.
    ///
    /// Children lists are re-derived from the `contains` edges in the order
    /// the edges are listed.
    ///
    /// # Errors
    ///
    /// - [`GraphError::InvalidCoreGroupSize`] if `core_group_size` is zero
    /// - [`GraphError::UnknownNode`] if an edge references a node missing from the spec
    pub fn from_spec(spec: &FlexTopoSpec, core_group_size: u32) -> Result<Self, GraphError> {
        let mut graph = Graph::new(core_group_size)?;

        for spec_node in &spec.nodes {
            let mut node = Node::new(NodeId::from(spec_node.id.as_str()), spec_node.node_type);
            for (key, value) in &spec_node.attributes {
                node.set_attr(key, value.clone());
            }
            graph.add_node(node);
        }

        for edge in &spec.edges {
            graph.add_edge(
                &NodeId::from(edge.source.as_str()),
                &NodeId::from(edge.target.as_str()),
                edge.edge_type,
            )?;
        }

        Ok(graph)
    }
}
