use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ListParams;
use kube::Api;
use kube::Client;
use topology::AllocationRequest;
use tracing::debug;
use tracing::warn;

use super::KubernetesError;

const CPU_RESOURCE: &str = "cpu";
const GPU_RESOURCE: &str = "nvidia.com/gpu";
const TERMINAL_PHASES: [&str; 2] = ["Succeeded", "Failed"];

/// A running container as reported in a pod's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunningContainer {
    pub(crate) name: String,
    pub(crate) runtime: String,
    pub(crate) container_id: String,
}

/// Lists the pods bound to `node_name` that have not terminated.
///
/// # Errors
///
/// - [`KubernetesError::ListFailed`] if the API request fails
#[tracing::instrument(skip(client))]
pub(crate) async fn list_node_pods(
    client: &Client,
    node_name: &str,
) -> Result<Vec<Pod>, Report<KubernetesError>> {
    let api: Api<Pod> = Api::all(client.clone());
    let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));

    let pods = api
        .list(&params)
        .await
        .change_context(KubernetesError::ListFailed {
            node_name: node_name.to_string(),
        })?;

    let active: Vec<Pod> = pods.items.into_iter().filter(is_active).collect();
    debug!(count = active.len(), "Listed active pods");
    Ok(active)
}

/// `namespace/name` of a pod.
pub(crate) fn workload_id(pod: &Pod) -> Option<String> {
    let name = pod.metadata.name.as_deref()?;
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
    Some(format!("{namespace}/{name}"))
}

fn is_active(pod: &Pod) -> bool {
    let phase = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref());
    !phase.is_some_and(|phase| TERMINAL_PHASES.contains(&phase))
}

/// Containers of `pod` that are running and carry a runtime container id.
pub(crate) fn running_containers(pod: &Pod) -> Vec<RunningContainer> {
    let Some(statuses) = pod
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
    else {
        return Vec::new();
    };

    statuses
        .iter()
        .filter(|status| {
            status
                .state
                .as_ref()
                .is_some_and(|state| state.running.is_some())
        })
        .filter_map(|status| {
            let (runtime, id) =
                crate::collector::split_container_id(status.container_id.as_deref()?)?;
            Some(RunningContainer {
                name: status.name.clone(),
                runtime: runtime.to_string(),
                container_id: id.to_string(),
            })
        })
        .collect()
}

/// Sums the CPU requests and GPU limits of all app containers in `pod`.
///
/// Returns `None` for unnamed pods and pods that request neither CPU nor
/// GPUs.
pub(crate) fn allocation_request(pod: &Pod) -> Option<AllocationRequest> {
    let workload_id = workload_id(pod)?;
    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();

    let mut milli_cpu: i64 = 0;
    let mut gpu_count: u32 = 0;
    for container in containers {
        milli_cpu = milli_cpu.saturating_add(container_milli_cpu(&workload_id, container));
        gpu_count = gpu_count.saturating_add(container_gpus(&workload_id, container));
    }

    if milli_cpu <= 0 && gpu_count == 0 {
        return None;
    }
    Some(AllocationRequest {
        workload_id,
        milli_cpu,
        gpu_count,
    })
}

fn container_milli_cpu(workload: &str, container: &Container) -> i64 {
    let Some(quantity) = container
        .resources
        .as_ref()
        .and_then(|resources| resources.requests.as_ref())
        .and_then(|requests| requests.get(CPU_RESOURCE))
    else {
        return 0;
    };

    parse_milli_cpu(quantity).unwrap_or_else(|| {
        warn!(
            workload,
            container = %container.name,
            quantity = %quantity.0,
            "Ignoring unparseable CPU request"
        );
        0
    })
}

/// GPU count from limits, falling back to requests.
fn container_gpus(workload: &str, container: &Container) -> u32 {
    let Some(resources) = container.resources.as_ref() else {
        return 0;
    };
    let Some(quantity) = resources
        .limits
        .as_ref()
        .and_then(|limits| limits.get(GPU_RESOURCE))
        .or_else(|| {
            resources
                .requests
                .as_ref()
                .and_then(|requests| requests.get(GPU_RESOURCE))
        })
    else {
        return 0;
    };

    quantity.0.trim().parse().unwrap_or_else(|_| {
        warn!(
            workload,
            container = %container.name,
            quantity = %quantity.0,
            "Ignoring unparseable GPU limit"
        );
        0
    })
}

/// Parses a CPU quantity (`2`, `500m`, `1.5`) into milli-cores, rounding
/// fractional milli-cores up.
pub(crate) fn parse_milli_cpu(quantity: &Quantity) -> Option<i64> {
    let value = quantity.0.trim();
    if let Some(milli) = value.strip_suffix('m') {
        return milli.parse().ok().filter(|milli: &i64| *milli >= 0);
    }

    let cores: f64 = value.parse().ok()?;
    if !cores.is_finite() || cores < 0.0 {
        return None;
    }
    Some((cores * 1000.0).ceil() as i64)
}
