//! Construction of the Socket → NUMA node → core group → core hierarchy
//! and the GPU nodes that sit beside it.

use api_types::attr;
use api_types::EdgeType;
use api_types::NodeType;
use api_types::Status;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::error::GraphError;
use crate::graph::Graph;
use crate::node::Node;
use crate::node::NodeId;

/// One logical CPU as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuDescriptor {
    pub cpu_id: u32,
    pub core_id: u32,
    pub socket_id: u32,
    pub numa_node_id: u32,
}

/// One GPU device as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuDescriptor {
    pub index: u32,
    pub uuid: String,
    pub name: String,
    pub memory_total_mib: u64,
}

impl Graph {
    /// Builds the CPU hierarchy from an unordered list of logical CPUs.
    ///
    /// Descriptors are processed in `(socket, numa, core)` order so that
    /// children lists come out identical for identical hardware. Calling this
    /// again with the same descriptors adds nothing.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnknownNode`] only if the graph was corrupted while building
    pub fn build_cpu_nodes(&mut self, cpus: &[CpuDescriptor]) -> Result<(), GraphError> {
        let mut sorted = cpus.to_vec();
        sorted.sort_by_key(|cpu| (cpu.socket_id, cpu.numa_node_id, cpu.core_id));

        for cpu in &sorted {
            let socket_id = NodeId::socket(cpu.socket_id);
            self.get_or_create(socket_id.clone(), NodeType::Socket);

            let numa_id = NodeId::numa(cpu.numa_node_id);
            self.get_or_create(numa_id.clone(), NodeType::NumaNode);
            self.add_edge(&socket_id, &numa_id, EdgeType::Contains)?;

            let group_index = cpu.core_id / self.core_group_size();
            let group_id = NodeId::core_group(cpu.numa_node_id, group_index);
            let group = self.get_or_create(group_id.clone(), NodeType::CoreGroup);
            group.set_attr(attr::NODE_ID, cpu.numa_node_id);
            group.set_attr(attr::GROUP_INDEX, group_index);
            self.add_edge(&numa_id, &group_id, EdgeType::Contains)?;

            let core_id = NodeId::core(cpu.core_id);
            self.get_or_create(core_id.clone(), NodeType::CpuCore)
                .set_attr(attr::STATUS, Status::Free);
            self.add_edge(&group_id, &core_id, EdgeType::Contains)?;
        }

        debug!(
            cpus = cpus.len(),
            nodes = self.len(),
            edges = self.edge_count(),
            "Built CPU hierarchy"
        );
        Ok(())
    }

    /// Adds one free, unattached `GPU` node per descriptor.
    pub fn add_gpu_nodes(&mut self, gpus: &[GpuDescriptor]) {
        for gpu in gpus {
            self.add_node(gpu_node(gpu));
        }
    }
}

fn gpu_node(gpu: &GpuDescriptor) -> Node {
    Node::new(NodeId::gpu(gpu.index), NodeType::Gpu)
        .with_attr(attr::UUID, gpu.uuid.as_str())
        .with_attr(attr::NAME, gpu.name.as_str())
        .with_attr(attr::MEMORY_TOTAL, gpu.memory_total_mib)
        .with_attr(attr::STATUS, Status::Free)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;

    use api_types::AttrValue;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::graph::DEFAULT_CORE_GROUP_SIZE;

    /// Two sockets of 32 cores each, eight NUMA nodes of 8 cores, no SMT.
    pub(crate) fn dual_socket_cpus() -> Vec<CpuDescriptor> {
        (0..64)
            .map(|id| CpuDescriptor {
                cpu_id: id,
                core_id: id,
                socket_id: id / 32,
                numa_node_id: id / 8,
            })
            .collect()
    }

    pub(crate) fn two_gpus() -> Vec<GpuDescriptor> {
        (0..2)
            .map(|index| GpuDescriptor {
                index,
                uuid: format!("GPU-0000000{index}-aaaa-bbbb-cccc-dddddddddddd"),
                name: "NVIDIA GeForce RTX 4090".to_string(),
                memory_total_mib: 24564,
            })
            .collect()
    }

    #[test]
    fn builds_dual_socket_hierarchy() {
        let mut graph = Graph::new(DEFAULT_CORE_GROUP_SIZE).unwrap();
        graph.build_cpu_nodes(&dual_socket_cpus()).unwrap();

        let summary = graph.summary();
        assert_eq!(summary.count(NodeType::Socket), 2);
        assert_eq!(summary.count(NodeType::NumaNode), 8);
        assert_eq!(summary.count(NodeType::CoreGroup), 8);
        assert_eq!(summary.count(NodeType::CpuCore), 64);
        assert_eq!(summary.cores.free, 64);

        for socket in ["socket-0", "socket-1"] {
            assert_eq!(graph.edges_from(socket, EdgeType::Contains).count(), 4);
        }
        for numa in 0..8 {
            let numa_id = NodeId::numa(numa);
            assert_eq!(
                graph.edges_from(numa_id.as_str(), EdgeType::Contains).count(),
                1
            );

            let group_id = NodeId::core_group(numa, numa);
            let group = graph.node(group_id.as_str()).unwrap();
            assert_eq!(group.children().len(), 8);
            assert_eq!(group.attr(attr::NODE_ID), Some(&AttrValue::Int(numa.into())));
            assert_eq!(group.attr(attr::GROUP_INDEX), Some(&AttrValue::Int(numa.into())));
        }
        for core in 0..64 {
            let core_id = NodeId::core(core);
            assert_eq!(
                graph.node(core_id.as_str()).unwrap().status(),
                Some(Status::Free)
            );
        }
    }

    #[test]
    fn every_node_has_exactly_one_parent_of_the_expected_type() {
        let mut graph = Graph::new(4).unwrap();
        graph.build_cpu_nodes(&dual_socket_cpus()).unwrap();

        let expected_parent = [
            (NodeType::NumaNode, NodeType::Socket),
            (NodeType::CoreGroup, NodeType::NumaNode),
            (NodeType::CpuCore, NodeType::CoreGroup),
        ];
        for (child_type, parent_type) in expected_parent {
            for node in graph.nodes_of_type(child_type) {
                let parents: Vec<_> = graph
                    .edges_to(node.id().as_str(), EdgeType::Contains)
                    .collect();
                assert_eq!(parents.len(), 1, "{} parents", node.id());
                let parent = graph.node(parents[0].source.as_str()).unwrap();
                assert_eq!(parent.node_type(), parent_type);
            }
        }
    }

    #[test]
    fn group_count_follows_numa_and_group_index() {
        // 4 cores per group splits every NUMA node in two
        let cpus = dual_socket_cpus();
        let mut graph = Graph::new(4).unwrap();
        graph.build_cpu_nodes(&cpus).unwrap();

        let distinct_groups: HashSet<(u32, u32)> = cpus
            .iter()
            .map(|cpu| (cpu.numa_node_id, cpu.core_id / 4))
            .collect();
        let distinct_cores: HashSet<u32> = cpus.iter().map(|cpu| cpu.core_id).collect();

        let summary = graph.summary();
        assert_eq!(summary.count(NodeType::CoreGroup), distinct_groups.len());
        assert_eq!(summary.count(NodeType::CpuCore), distinct_cores.len());
        assert_eq!(
            graph.edges_from("numa-0", EdgeType::Contains).count(),
            2
        );
    }

    #[test]
    fn hyperthread_siblings_share_a_core() {
        let cpus: Vec<CpuDescriptor> = (0..8)
            .map(|cpu_id| CpuDescriptor {
                cpu_id,
                core_id: cpu_id % 4,
                socket_id: 0,
                numa_node_id: 0,
            })
            .collect();

        let mut graph = Graph::new(DEFAULT_CORE_GROUP_SIZE).unwrap();
        graph.build_cpu_nodes(&cpus).unwrap();

        assert_eq!(graph.summary().count(NodeType::CpuCore), 4);
        assert_eq!(graph.node("coregroup-0-0").unwrap().children().len(), 4);
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let mut graph = Graph::new(DEFAULT_CORE_GROUP_SIZE).unwrap();
        graph.build_cpu_nodes(&dual_socket_cpus()).unwrap();
        graph.add_gpu_nodes(&two_gpus());
        let (nodes, edges) = (graph.len(), graph.edge_count());

        graph.build_cpu_nodes(&dual_socket_cpus()).unwrap();
        graph.add_gpu_nodes(&two_gpus());

        assert_eq!(graph.len(), nodes);
        assert_eq!(graph.edge_count(), edges);
        assert_eq!(graph.node("coregroup-0-0").unwrap().children().len(), 8);
    }

    #[test]
    fn input_order_does_not_change_children_order() {
        let mut shuffled = dual_socket_cpus();
        shuffled.reverse();

        let mut forward = Graph::new(DEFAULT_CORE_GROUP_SIZE).unwrap();
        forward.build_cpu_nodes(&dual_socket_cpus()).unwrap();
        let mut reversed = Graph::new(DEFAULT_CORE_GROUP_SIZE).unwrap();
        reversed.build_cpu_nodes(&shuffled).unwrap();

        for group in forward.nodes_of_type(NodeType::CoreGroup) {
            let other = reversed.node(group.id().as_str()).unwrap();
            assert_eq!(group.children().to_vec(), other.children().to_vec());
        }
    }

    #[test]
    fn gpus_are_free_and_detached() {
        let mut graph = Graph::new(DEFAULT_CORE_GROUP_SIZE).unwrap();
        graph.add_gpu_nodes(&two_gpus());

        let gpu = graph.node("gpu-1").unwrap();
        assert_eq!(gpu.node_type(), NodeType::Gpu);
        assert_eq!(gpu.status(), Some(Status::Free));
        assert_eq!(
            gpu.attr(attr::MEMORY_TOTAL).and_then(AttrValue::as_int),
            Some(24564)
        );
        assert_eq!(
            gpu.attr(attr::NAME).and_then(AttrValue::as_str),
            Some("NVIDIA GeForce RTX 4090")
        );
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn no_gpus_is_a_valid_graph() {
        let mut graph = Graph::new(DEFAULT_CORE_GROUP_SIZE).unwrap();
        graph.build_cpu_nodes(&dual_socket_cpus()).unwrap();
        graph.add_gpu_nodes(&[]);

        assert_eq!(graph.summary().count(NodeType::Gpu), 0);
    }
}
