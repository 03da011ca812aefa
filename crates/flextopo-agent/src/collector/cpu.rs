use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use tokio::process::Command;
use topology::CpuDescriptor;
use tracing::debug;

use super::CollectorError;

/// Columns requested from lscpu, in parse order.
const LSCPU_COLUMNS: &str = "-p=CPU,Core,Socket,Node";

/// Enumerates logical CPUs with `lscpu`.
///
/// # Errors
///
/// - [`CollectorError::CommandFailed`] if lscpu cannot be run or exits non-zero
pub(crate) async fn collect_cpus(
    lscpu_path: &Path,
) -> Result<Vec<CpuDescriptor>, Report<CollectorError>> {
    let output = Command::new(lscpu_path)
        .arg(LSCPU_COLUMNS)
        .output()
        .await
        .change_context(CollectorError::CommandFailed {
            command: lscpu_path.display().to_string(),
            message: "failed to spawn".to_string(),
        })?;

    if !output.status.success() {
        return Err(Report::new(CollectorError::CommandFailed {
            command: lscpu_path.display().to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }));
    }

    Ok(parse_lscpu_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Parses `lscpu -p=CPU,Core,Socket,Node` output.
///
/// Malformed records are skipped. An empty `Node` column, printed on machines
/// without NUMA information, is read as NUMA node 0.
pub(crate) fn parse_lscpu_output(output: &str) -> Vec<CpuDescriptor> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let record = parse_record(line);
            if record.is_none() {
                debug!(line, "Skipping malformed lscpu record");
            }
            record
        })
        .collect()
}

fn parse_record(line: &str) -> Option<CpuDescriptor> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 4 {
        return None;
    }

    let numa_node_id = match fields[3] {
        "" => 0,
        node => node.parse().ok()?,
    };

    Some(CpuDescriptor {
        cpu_id: fields[0].parse().ok()?,
        core_id: fields[1].parse().ok()?,
        socket_id: fields[2].parse().ok()?,
        numa_node_id,
    })
}
