//! Topology graph and resource-state engine.
//!
//! The graph models one machine as a tree of `Socket` → `NUMANode` →
//! `CoreGroup` → `CPUCore` nodes plus standalone `GPU` nodes, linked by
//! `contains` edges. It is rebuilt from hardware descriptors every
//! collection cycle, annotated with observed or declared resource usage, and
//! flattened into a [`api_types::FlexTopoSpec`] for publication.
//!
//! The main components are:
//! - [`Graph`]: node/edge container with idempotent get-or-create
//! - [`CpuDescriptor`] / [`GpuDescriptor`]: builder input
//! - [`UsageObservation`] / [`AllocationRequest`]: resource-state input

mod builder;
mod edge;
mod error;
mod graph;
mod node;
mod snapshot;
mod state;

pub use builder::CpuDescriptor;
pub use builder::GpuDescriptor;
pub use edge::Edge;
pub use error::AllocationError;
pub use error::GraphError;
pub use graph::Graph;
pub use graph::StatusCounts;
pub use graph::TopologySummary;
pub use graph::DEFAULT_CORE_GROUP_SIZE;
pub use node::Node;
pub use node::NodeId;
pub use state::Allocation;
pub use state::AllocationRequest;
pub use state::UsageObservation;
pub use state::UsageUpdate;
