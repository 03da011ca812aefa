use topology::TopologySummary;

/// Emits one `topology` measurement per cycle for the metrics file.
pub(crate) fn record_topology(node_name: &str, summary: &TopologySummary, duration_ms: u64) {
    tracing::info!(
        target: "metrics.topology",
        tag_node = node_name,
        cores_free = summary.cores.free as u64,
        cores_used = summary.cores.used as u64,
        cores_allocated = summary.cores.allocated as u64,
        gpus_free = summary.gpus.free as u64,
        gpus_used = summary.gpus.used as u64,
        gpus_allocated = summary.gpus.allocated as u64,
        cycle_duration_ms = duration_ms,
    );
}
