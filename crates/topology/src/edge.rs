use api_types::EdgeType;

use crate::node::NodeId;

/// A directed, typed relation between two nodes.
///
/// The whole struct is the de-duplication key: at most one edge of a given
/// type exists between an ordered pair of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
}

impl Edge {
    pub fn new(source: NodeId, target: NodeId, edge_type: EdgeType) -> Self {
        Self {
            source,
            target,
            edge_type,
        }
    }
}
