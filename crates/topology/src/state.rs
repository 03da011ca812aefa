//! Resource-state updates applied to a freshly built graph.
//!
//! Two independent modes exist: observed usage marks cores and GPUs a
//! workload is actually running on, declared allocation reserves free
//! capacity for what a workload requests. Neither is cumulative across
//! cycles; the graph is rebuilt before they are applied again.

use api_types::attr;
use api_types::NodeType;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::error::AllocationError;
use crate::graph::Graph;
use crate::node::NodeId;

/// What a workload was seen running on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageObservation {
    pub workload_id: String,
    pub cpu_core_ids: Vec<u32>,
    pub gpu_uuids: Vec<String>,
}

/// What a workload declared it needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub workload_id: String,
    /// CPU request in milli-cores
    pub milli_cpu: i64,
    pub gpu_count: u32,
}

impl AllocationRequest {
    /// Whole cores needed to cover the request, rounding up.
    pub fn cores_needed(&self) -> usize {
        if self.milli_cpu <= 0 {
            return 0;
        }
        usize::try_from((self.milli_cpu + 999) / 1000).unwrap_or(usize::MAX)
    }

    pub fn gpus_needed(&self) -> usize {
        self.gpu_count as usize
    }
}

/// Outcome of [`Graph::allocate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    pub workload_id: String,
    pub cores_needed: usize,
    pub gpus_needed: usize,
    /// Cores marked allocated, in assignment order
    pub core_ids: Vec<NodeId>,
    /// GPUs marked allocated, in assignment order
    pub gpu_ids: Vec<NodeId>,
}

impl Allocation {
    pub fn cores_allocated(&self) -> usize {
        self.core_ids.len()
    }

    pub fn gpus_allocated(&self) -> usize {
        self.gpu_ids.len()
    }

    pub fn is_satisfied(&self) -> bool {
        self.cores_allocated() >= self.cores_needed && self.gpus_allocated() >= self.gpus_needed
    }

    /// The shortfall, if any. Nothing is rolled back.
    pub fn shortfall(&self) -> Option<AllocationError> {
        if self.is_satisfied() {
            return None;
        }
        Some(AllocationError::Shortfall {
            workload: self.workload_id.clone(),
            cores_needed: self.cores_needed,
            cores_allocated: self.cores_allocated(),
            gpus_needed: self.gpus_needed,
            gpus_allocated: self.gpus_allocated(),
        })
    }

    /// # Errors
    ///
    /// - [`AllocationError::Shortfall`] if less than requested was assigned
    pub fn into_result(self) -> Result<Self, AllocationError> {
        match self.shortfall() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Number of nodes an observed-usage update touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageUpdate {
    pub cores_marked: usize,
    pub gpus_marked: usize,
}

impl Graph {
    /// Marks `core-{id}` for each id as used by `workload`.
    ///
    /// Ids without a matching core are skipped. Returns the number of cores
    /// marked.
    pub fn update_cpu_usage(&mut self, workload: &str, core_ids: &[u32]) -> usize {
        let mut marked = 0;
        for &core in core_ids {
            let id = NodeId::core(core);
            match self.node_mut(id.as_str()) {
                Some(node) if node.node_type() == NodeType::CpuCore => {
                    node.mark_used(workload);
                    marked += 1;
                }
                _ => debug!(workload, core, "Skipping unknown CPU core"),
            }
        }
        marked
    }

    /// Marks the GPU with each uuid as used by `workload`.
    ///
    /// Uuids are compared case-insensitively. Returns the number of GPUs
    /// marked.
    pub fn update_gpu_usage<S: AsRef<str>>(&mut self, workload: &str, gpu_uuids: &[S]) -> usize {
        let mut marked = 0;
        for uuid in gpu_uuids {
            let uuid = uuid.as_ref();
            let found = self
                .nodes_of_type(NodeType::Gpu)
                .find(|node| {
                    node.attr(attr::UUID)
                        .and_then(|value| value.as_str())
                        .is_some_and(|candidate| candidate.eq_ignore_ascii_case(uuid))
                })
                .map(|node| node.id().clone());

            match found.and_then(|id| self.node_mut(id.as_str())) {
                Some(node) => {
                    node.mark_used(workload);
                    marked += 1;
                }
                None => debug!(workload, uuid, "Skipping unknown GPU"),
            }
        }
        marked
    }

    /// Applies one usage observation.
    pub fn apply_usage(&mut self, observation: &UsageObservation) -> UsageUpdate {
        let workload = observation.workload_id.as_str();
        UsageUpdate {
            cores_marked: self.update_cpu_usage(workload, &observation.cpu_core_ids),
            gpus_marked: self.update_gpu_usage(workload, &observation.gpu_uuids),
        }
    }

    /// Reserves cores and GPUs for a declared request.
    ///
    /// Cores are taken only from core groups whose cores are all free,
    /// walking groups in discovery order and cores in child order, so a
    /// request lands in as few groups as possible. GPUs are taken from free
    /// GPUs in discovery order. Check [`Allocation::shortfall`] for partial
    /// results.
    pub fn allocate(&mut self, request: &AllocationRequest) -> Allocation {
        let mut allocation = Allocation {
            workload_id: request.workload_id.clone(),
            cores_needed: request.cores_needed(),
            gpus_needed: request.gpus_needed(),
            ..Default::default()
        };

        let free_groups: Vec<NodeId> = self
            .nodes_of_type(NodeType::CoreGroup)
            .filter(|group| self.group_is_free(group.id().as_str()))
            .map(|group| group.id().clone())
            .collect();

        'groups: for group in free_groups {
            let cores = self
                .node(group.as_str())
                .map(|group| group.children().to_vec())
                .unwrap_or_default();
            for core in cores {
                if allocation.core_ids.len() >= allocation.cores_needed {
                    break 'groups;
                }
                if let Some(node) = self.node_mut(core.as_str()) {
                    node.mark_allocated(&request.workload_id);
                    allocation.core_ids.push(core);
                }
            }
        }

        let free_gpus: Vec<NodeId> = self
            .nodes_of_type(NodeType::Gpu)
            .filter(|gpu| gpu.is_free())
            .take(allocation.gpus_needed)
            .map(|gpu| gpu.id().clone())
            .collect();
        for gpu in free_gpus {
            if let Some(node) = self.node_mut(gpu.as_str()) {
                node.mark_allocated(&request.workload_id);
                allocation.gpu_ids.push(gpu);
            }
        }

        debug!(
            workload = %request.workload_id,
            cores_needed = allocation.cores_needed,
            cores_allocated = allocation.cores_allocated(),
            gpus_needed = allocation.gpus_needed,
            gpus_allocated = allocation.gpus_allocated(),
            "Applied declared allocation"
        );
        allocation
    }

    /// A group is available only if every child core is free.
    fn group_is_free(&self, group_id: &str) -> bool {
        self.children(group_id)
            .all(|core| core.node_type() == NodeType::CpuCore && core.is_free())
    }
}
