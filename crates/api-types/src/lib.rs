//! Shared API type definitions
//!
//! This crate contains the vocabulary shared by the topology engine and the
//! node agent: node and edge kinds, the attribute value type with its key
//! vocabulary, and the `FlexTopo` custom resource the agent publishes for
//! each node.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

/// API group of the `FlexTopo` custom resource.
pub const FLEXTOPO_GROUP: &str = "flextopo.baichuan-inc.com";
/// API version of the `FlexTopo` custom resource.
pub const FLEXTOPO_VERSION: &str = "v1alpha1";

/// Attribute keys understood by consumers of the snapshot.
pub mod attr {
    /// [`crate::Status`] of a `CPUCore` or `GPU` node
    pub const STATUS: &str = "status";
    /// Workload observed running on the node
    pub const USED_BY: &str = "usedBy";
    /// Workload the node was reserved for
    pub const ALLOCATED_TO: &str = "allocatedTo";
    pub const UUID: &str = "uuid";
    pub const NAME: &str = "name";
    /// Total device memory in MiB
    pub const MEMORY_TOTAL: &str = "memoryTotal";
    /// NUMA node id a core group belongs to
    pub const NODE_ID: &str = "nodeID";
    pub const GROUP_INDEX: &str = "groupIndex";
}

/// Kind of a vertex in the topology graph.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
    derive_more::Display,
)]
pub enum NodeType {
    Socket,
    #[serde(rename = "NUMANode")]
    #[display("NUMANode")]
    NumaNode,
    CoreGroup,
    #[serde(rename = "CPUCore")]
    #[display("CPUCore")]
    CpuCore,
    #[serde(rename = "GPU")]
    #[display("GPU")]
    Gpu,
}

/// Kind of a directed relation between two nodes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
    derive_more::Display,
)]
#[serde(rename_all = "camelCase")]
pub enum EdgeType {
    /// Physical or logical containment, parent to child
    #[display("contains")]
    Contains,
}

/// Occupancy of a core or GPU.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Unclaimed
    #[display("free")]
    Free,
    /// Observed running a workload
    #[display("used")]
    Used,
    /// Reserved for a workload by declared requests
    #[display("allocated")]
    Allocated,
}

impl Status {
    /// Parses the wire name of a status.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "free" => Some(Status::Free),
            "used" => Some(Status::Used),
            "allocated" => Some(Status::Allocated),
            _ => None,
        }
    }
}

/// Scalar attribute value.
///
/// Serialized untagged, so a status reads as `"free"`, an integer as a
/// JSON number and anything else as a string. Decoded on its own, a string
/// equal to a status name comes back as [`AttrValue::Status`]; attribute
/// maps inside [`FlexTopoNode`] are decoded by key instead, and only
/// [`attr::STATUS`] yields a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum AttrValue {
    Status(Status),
    Int(i64),
    Str(String),
}

impl AttrValue {
    pub fn as_status(&self) -> Option<Status> {
        match self {
            AttrValue::Status(status) => Some(*status),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Status(status) => write!(f, "{status}"),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<Status> for AttrValue {
    fn from(status: Status) -> Self {
        AttrValue::Status(status)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        AttrValue::Int(i64::from(value))
    }
}

impl From<u64> for AttrValue {
    fn from(value: u64) -> Self {
        AttrValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

/// Flattened topology graph of one node, published as the spec of its
/// `FlexTopo` resource.
///
/// Both lists are unordered.
#[derive(
    CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema,
)]
#[kube(
    group = "flextopo.baichuan-inc.com",
    version = "v1alpha1",
    kind = "FlexTopo",
    plural = "flextopos"
)]
pub struct FlexTopoSpec {
    pub nodes: Vec<FlexTopoNode>,
    pub edges: Vec<FlexTopoEdge>,
}

/// A vertex of the flattened graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FlexTopoNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, deserialize_with = "deserialize_attributes")]
    pub attributes: BTreeMap<String, AttrValue>,
}

fn deserialize_attributes<'de, D>(deserializer: D) -> Result<BTreeMap<String, AttrValue>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAttrValue {
        Int(i64),
        Str(String),
    }

    let raw = BTreeMap::<String, RawAttrValue>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                RawAttrValue::Int(i) => AttrValue::Int(i),
                RawAttrValue::Str(s) if key == attr::STATUS => match Status::from_name(&s) {
                    Some(status) => AttrValue::Status(status),
                    None => AttrValue::Str(s),
                },
                RawAttrValue::Str(s) => AttrValue::Str(s),
            };
            (key, value)
        })
        .collect())
}

/// An edge of the flattened graph, endpoints given by node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct FlexTopoEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
}
