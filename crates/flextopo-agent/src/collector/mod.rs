//! Hardware discovery and per-cycle resource-state collection.
//!
//! Every cycle starts from a freshly built graph. Observed mode resolves each
//! running container to its host PID and marks the cores and GPUs that
//! process can run on; declared mode reserves capacity for what each pod
//! requests.

use core::error::Error;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Pod;
use topology::CpuDescriptor;
use topology::GpuDescriptor;
use topology::Graph;
use topology::UsageObservation;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::UpdateMode;
use crate::k8s;

mod cpu;
mod gpu;
mod process;

pub(crate) use gpu::GpuInventory;
pub(crate) use gpu::nvml_inventory;
pub(crate) use process::split_container_id;

/// Errors that can occur while collecting topology or usage information.
#[derive(Debug, Display)]
pub(crate) enum CollectorError {
    #[display("Command {command} failed: {message}")]
    CommandFailed { command: String, message: String },
    #[display("GPU query failed: {message}")]
    GpuQuery { message: String },
    #[display("Failed to parse process information: {message}")]
    ParseError { message: String },
    #[display("Failed to read proc filesystem: {message}")]
    ProcReadError { message: String },
    #[display("Unsupported container runtime: {runtime}")]
    UnsupportedRuntime { runtime: String },
    #[display("Failed to build topology graph")]
    GraphBuild,
}

impl Error for CollectorError {}

/// Static hardware inventory of the machine.
#[derive(Debug, Clone, Default)]
pub(crate) struct Hardware {
    pub(crate) cpus: Vec<CpuDescriptor>,
    pub(crate) gpus: Vec<GpuDescriptor>,
}

impl Hardware {
    /// Builds a graph with every resource free.
    ///
    /// # Errors
    ///
    /// - [`CollectorError::GraphBuild`] if the core group size is invalid
    pub(crate) fn build_graph(&self, core_group_size: u32) -> Result<Graph, Report<CollectorError>> {
        let mut graph = Graph::new(core_group_size).change_context(CollectorError::GraphBuild)?;
        graph
            .build_cpu_nodes(&self.cpus)
            .change_context(CollectorError::GraphBuild)?;
        graph.add_gpu_nodes(&self.gpus);
        Ok(graph)
    }

    /// Maps logical CPU ids to the physical core ids that name core nodes.
    fn core_ids_by_cpu(&self) -> HashMap<u32, u32> {
        self.cpus.iter().map(|cpu| (cpu.cpu_id, cpu.core_id)).collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CollectorSettings {
    pub(crate) core_group_size: u32,
    pub(crate) lscpu_path: PathBuf,
    pub(crate) crictl_path: PathBuf,
    pub(crate) proc_root: PathBuf,
}

pub(crate) struct Collector {
    settings: CollectorSettings,
    gpu: Arc<dyn GpuInventory>,
}

impl Collector {
    pub(crate) fn new(settings: CollectorSettings, gpu: Arc<dyn GpuInventory>) -> Self {
        Self { settings, gpu }
    }

    /// Enumerates CPUs and GPUs. A failing GPU query leaves the machine
    /// without GPUs.
    ///
    /// # Errors
    ///
    /// - [`CollectorError::CommandFailed`] if lscpu fails
    pub(crate) async fn collect_hardware(&self) -> Result<Hardware, Report<CollectorError>> {
        let cpus = cpu::collect_cpus(&self.settings.lscpu_path).await?;
        let gpus = self.gpu.devices().unwrap_or_else(|e| {
            warn!("GPU discovery failed, continuing without GPUs: {e:?}");
            Vec::new()
        });
        info!(
            cpus = cpus.len(),
            gpus = gpus.len(),
            "Collected hardware inventory"
        );
        Ok(Hardware { cpus, gpus })
    }

    /// Builds this cycle's graph and applies the state of `pods` to it.
    ///
    /// # Errors
    ///
    /// - [`CollectorError::GraphBuild`] if the graph cannot be built
    pub(crate) async fn populate(
        &self,
        hardware: &Hardware,
        pods: &[Pod],
        mode: UpdateMode,
    ) -> Result<Graph, Report<CollectorError>> {
        let mut graph = hardware.build_graph(self.settings.core_group_size)?;

        match mode {
            UpdateMode::Observed => {
                let observations = self.observe_usage(hardware, pods).await;
                for observation in &observations {
                    let update = graph.apply_usage(observation);
                    debug!(
                        workload = %observation.workload_id,
                        cores = update.cores_marked,
                        gpus = update.gpus_marked,
                        "Applied observed usage"
                    );
                }
            }
            UpdateMode::Declared => apply_declared(&mut graph, pods),
        }

        Ok(graph)
    }

    /// Resolves every running container to the cores and GPUs its main
    /// process uses.
    ///
    /// Containers that cannot be resolved are logged and skipped.
    async fn observe_usage(&self, hardware: &Hardware, pods: &[Pod]) -> Vec<UsageObservation> {
        let core_ids = hardware.core_ids_by_cpu();
        let mut observations = Vec::new();

        for pod in pods {
            let Some(workload_id) = k8s::workload_id(pod) else {
                continue;
            };
            for container in k8s::running_containers(pod) {
                let pid = match process::container_pid(
                    &self.settings.crictl_path,
                    &container.runtime,
                    &container.container_id,
                )
                .await
                {
                    Ok(pid) => pid,
                    Err(e) => {
                        warn!(
                            workload = %workload_id,
                            container = %container.name,
                            "Failed to resolve container PID: {e:?}"
                        );
                        continue;
                    }
                };

                match self.observe_pid(&workload_id, pid, &core_ids).await {
                    Ok(observation) => observations.push(observation),
                    Err(e) => warn!(
                        workload = %workload_id,
                        container = %container.name,
                        pid,
                        "Failed to observe container usage: {e:?}"
                    ),
                }
            }
        }

        observations
    }

    /// Reads the CPU affinity and GPU processes of `pid`.
    ///
    /// A failed GPU query is logged and leaves the observation without GPUs.
    ///
    /// # Errors
    ///
    /// - [`CollectorError::ProcReadError`] or [`CollectorError::ParseError`] if the affinity cannot be read
    async fn observe_pid(
        &self,
        workload_id: &str,
        pid: u32,
        core_ids: &HashMap<u32, u32>,
    ) -> Result<UsageObservation, Report<CollectorError>> {
        let cpus = process::allowed_cpus(&self.settings.proc_root, pid).await?;

        let mut cpu_core_ids: Vec<u32> = cpus
            .iter()
            .filter_map(|cpu| core_ids.get(cpu).copied())
            .collect();
        cpu_core_ids.sort_unstable();
        cpu_core_ids.dedup();

        let gpu_uuids = self.gpu.gpus_for_process(pid).unwrap_or_else(|e| {
            warn!(
                workload = %workload_id,
                pid,
                "GPU usage unavailable, recording CPU usage only: {e:?}"
            );
            Vec::new()
        });

        Ok(UsageObservation {
            workload_id: workload_id.to_string(),
            cpu_core_ids,
            gpu_uuids,
        })
    }
}

/// Reserves capacity for each pod's declared requests, in listing order.
fn apply_declared(graph: &mut Graph, pods: &[Pod]) {
    for request in pods.iter().filter_map(k8s::allocation_request) {
        let allocation = graph.allocate(&request);
        if let Some(shortfall) = allocation.shortfall() {
            warn!("{shortfall}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use api_types::attr;
    use api_types::Status;
    use k8s_openapi::api::core::v1::Container;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::api::core::v1::ResourceRequirements;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::api::ObjectMeta;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::gpu::tests::FakeInventory;
    use super::*;

    const GPU_UUID: &str = "GPU-5d4c3b2a-1111-2222-3333-444455556666";

    /// One socket, one NUMA node, four cores with two hyperthreads each.
    fn smt_hardware() -> Hardware {
        let cpus = (0..8)
            .map(|cpu_id| CpuDescriptor {
                cpu_id,
                core_id: cpu_id % 4,
                socket_id: 0,
                numa_node_id: 0,
            })
            .collect();
        let gpus = vec![GpuDescriptor {
            index: 0,
            uuid: GPU_UUID.to_string(),
            name: "NVIDIA A100-SXM4-80GB".to_string(),
            memory_total_mib: 81920,
        }];
        Hardware { cpus, gpus }
    }

    fn collector(proc_root: PathBuf, inventory: FakeInventory) -> Collector {
        Collector::new(
            CollectorSettings {
                core_group_size: 2,
                lscpu_path: PathBuf::from("lscpu"),
                crictl_path: PathBuf::from("/nonexistent/crictl"),
                proc_root,
            },
            Arc::new(inventory),
        )
    }

    fn requesting_pod(name: &str, cpu: &str, gpus: &str) -> Pod {
        let resources = |key: &str, value: &str| {
            Some(BTreeMap::from([(key.to_string(), Quantity(value.to_string()))]))
        };
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: resources("cpu", cpu),
                        limits: resources("nvidia.com/gpu", gpus),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn hyperthreads_collapse_onto_cores() {
        let graph = smt_hardware().build_graph(2).unwrap();

        let summary = graph.summary();
        assert_eq!(summary.cores.free, 4);
        assert_eq!(summary.gpus.free, 1);
        assert_eq!(graph.node("coregroup-0-1").unwrap().children().len(), 2);
    }

    #[test(tokio::test)]
    async fn observed_pid_maps_cpus_to_cores() {
        let proc_root = tempfile::tempdir().unwrap();
        let pid_dir = proc_root.path().join("777");
        std::fs::create_dir(&pid_dir).unwrap();
        std::fs::write(pid_dir.join("status"), "Name:\tworker\nCpus_allowed_list:\t1,5-6\n")
            .unwrap();
        let inventory = FakeInventory {
            processes: HashMap::from([(777, vec![GPU_UUID.to_lowercase()])]),
            ..Default::default()
        };
        let collector = collector(proc_root.path().to_path_buf(), inventory);
        let hardware = smt_hardware();

        let observation = collector
            .observe_pid("default/worker", 777, &hardware.core_ids_by_cpu())
            .await
            .unwrap();

        assert_eq!(observation.cpu_core_ids, vec![1, 2]);

        let mut graph = hardware.build_graph(2).unwrap();
        graph.apply_usage(&observation);
        assert_eq!(graph.node("core-1").unwrap().status(), Some(Status::Used));
        assert_eq!(graph.node("core-2").unwrap().status(), Some(Status::Used));
        assert_eq!(graph.node("core-0").unwrap().status(), Some(Status::Free));
        assert_eq!(graph.node("gpu-0").unwrap().status(), Some(Status::Used));
    }

    struct FailingInventory;

    impl GpuInventory for FailingInventory {
        fn devices(&self) -> Result<Vec<GpuDescriptor>, Report<CollectorError>> {
            Ok(Vec::new())
        }

        fn gpus_for_process(&self, _pid: u32) -> Result<Vec<String>, Report<CollectorError>> {
            Err(Report::new(CollectorError::GpuQuery {
                message: "NVML driver not loaded".to_string(),
            }))
        }
    }

    #[test(tokio::test)]
    async fn gpu_query_failure_keeps_cpu_usage() {
        let proc_root = tempfile::tempdir().unwrap();
        let pid_dir = proc_root.path().join("777");
        std::fs::create_dir(&pid_dir).unwrap();
        std::fs::write(pid_dir.join("status"), "Cpus_allowed_list:\t1\n").unwrap();
        let collector = Collector::new(
            CollectorSettings {
                core_group_size: 2,
                lscpu_path: PathBuf::from("lscpu"),
                crictl_path: PathBuf::from("/nonexistent/crictl"),
                proc_root: proc_root.path().to_path_buf(),
            },
            Arc::new(FailingInventory),
        );
        let hardware = smt_hardware();

        let observation = collector
            .observe_pid("default/worker", 777, &hardware.core_ids_by_cpu())
            .await
            .unwrap();

        assert_eq!(observation.cpu_core_ids, vec![1]);
        assert!(observation.gpu_uuids.is_empty());

        let mut graph = hardware.build_graph(2).unwrap();
        graph.apply_usage(&observation);
        assert_eq!(graph.node("core-1").unwrap().status(), Some(Status::Used));
        assert_eq!(graph.node("gpu-0").unwrap().status(), Some(Status::Free));
    }

    #[test(tokio::test)]
    async fn observed_mode_skips_unresolvable_containers() {
        let collector = collector(PathBuf::from("/nonexistent"), FakeInventory::default());
        let pods = vec![requesting_pod("web", "1", "0")];

        let graph = collector
            .populate(&smt_hardware(), &pods, UpdateMode::Observed)
            .await
            .unwrap();

        assert_eq!(graph.summary().cores.free, 4);
    }

    #[test(tokio::test)]
    async fn declared_mode_allocates_requests() {
        let collector = collector(PathBuf::from("/nonexistent"), FakeInventory::default());
        let pods = vec![
            requesting_pod("trainer", "1500m", "1"),
            requesting_pod("late", "4", "1"),
        ];

        let graph = collector
            .populate(&smt_hardware(), &pods, UpdateMode::Declared)
            .await
            .unwrap();

        let summary = graph.summary();
        assert_eq!(summary.cores.allocated, 4);
        assert_eq!(summary.gpus.allocated, 1);
        assert_eq!(
            graph
                .node("gpu-0")
                .unwrap()
                .attr(attr::ALLOCATED_TO)
                .and_then(|value| value.as_str()),
            Some("default/trainer")
        );
        assert_eq!(
            graph
                .node("core-3")
                .unwrap()
                .attr(attr::ALLOCATED_TO)
                .and_then(|value| value.as_str()),
            Some("default/late")
        );
    }
}
