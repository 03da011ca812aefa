//! Container process introspection: PID lookup through the CRI and CPU
//! affinity from the proc filesystem.

use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use tokio::process::Command;

use super::CollectorError;

/// Container runtimes whose containers `crictl inspect` can resolve.
const CRI_RUNTIMES: [&str; 2] = ["containerd", "cri-o"];

const CPUS_ALLOWED_LIST: &str = "Cpus_allowed_list:";

#[derive(Debug, Deserialize)]
struct CrictlInspect {
    info: CrictlInfo,
}

#[derive(Debug, Deserialize)]
struct CrictlInfo {
    pid: u32,
}

/// Splits a container status id such as `containerd://4f2a...` into runtime
/// and container id.
pub(crate) fn split_container_id(container_id: &str) -> Option<(&str, &str)> {
    let (runtime, id) = container_id.split_once("://")?;
    if runtime.is_empty() || id.is_empty() {
        return None;
    }
    Some((runtime, id))
}

/// Resolves the host PID of a container's main process.
///
/// # Errors
///
/// - [`CollectorError::UnsupportedRuntime`] for runtimes not reachable through crictl
/// - [`CollectorError::CommandFailed`] if crictl fails
/// - [`CollectorError::ParseError`] if crictl output has no PID
pub(crate) async fn container_pid(
    crictl_path: &Path,
    runtime: &str,
    container_id: &str,
) -> Result<u32, Report<CollectorError>> {
    if !CRI_RUNTIMES.contains(&runtime) {
        return Err(Report::new(CollectorError::UnsupportedRuntime {
            runtime: runtime.to_string(),
        }));
    }

    let output = Command::new(crictl_path)
        .args(["inspect", "--output=json", container_id])
        .output()
        .await
        .change_context(CollectorError::CommandFailed {
            command: crictl_path.display().to_string(),
            message: "failed to spawn".to_string(),
        })?;

    if !output.status.success() {
        return Err(Report::new(CollectorError::CommandFailed {
            command: crictl_path.display().to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }));
    }

    parse_crictl_pid(&output.stdout)
}

pub(crate) fn parse_crictl_pid(output: &[u8]) -> Result<u32, Report<CollectorError>> {
    let inspect: CrictlInspect =
        serde_json::from_slice(output).change_context(CollectorError::ParseError {
            message: "crictl inspect output has no info.pid".to_string(),
        })?;
    Ok(inspect.info.pid)
}

/// Reads the CPUs a process may run on from `<proc_root>/<pid>/status`.
///
/// # Errors
///
/// - [`CollectorError::ProcReadError`] if the status file cannot be read
/// - [`CollectorError::ParseError`] if the affinity list is missing or invalid
pub(crate) async fn allowed_cpus(
    proc_root: &Path,
    pid: u32,
) -> Result<Vec<u32>, Report<CollectorError>> {
    let path = proc_root.join(pid.to_string()).join("status");
    let status = tokio::fs::read_to_string(&path)
        .await
        .change_context(CollectorError::ProcReadError {
            message: format!("failed to read {}", path.display()),
        })?;

    parse_allowed_cpus(&status).attach_printable_lazy(|| format!("in {}", path.display()))
}

pub(crate) fn parse_allowed_cpus(status: &str) -> Result<Vec<u32>, Report<CollectorError>> {
    let list = status
        .lines()
        .find_map(|line| line.strip_prefix(CPUS_ALLOWED_LIST))
        .ok_or_else(|| {
            Report::new(CollectorError::ParseError {
                message: format!("missing {CPUS_ALLOWED_LIST}"),
            })
        })?;

    parse_cpu_list(list)
}

/// Parses a kernel CPU list such as `0-3,8,10-11`.
///
/// # Errors
///
/// - [`CollectorError::ParseError`] for non-numeric ids and malformed or reversed ranges
pub(crate) fn parse_cpu_list(list: &str) -> Result<Vec<u32>, Report<CollectorError>> {
    let mut cpus = Vec::new();

    for segment in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match segment.split_once('-') {
            Some((start, end)) => {
                let start = parse_cpu_number(start)?;
                let end = parse_cpu_number(end)?;
                if start > end {
                    return Err(Report::new(CollectorError::ParseError {
                        message: format!("invalid CPU range: {segment}"),
                    }));
                }
                cpus.extend(start..=end);
            }
            None => cpus.push(parse_cpu_number(segment)?),
        }
    }

    Ok(cpus)
}

/// Largest logical CPU id the kernel can report (`NR_CPUS` tops out at 8192).
const MAX_CPU_ID: u32 = 8191;

fn parse_cpu_number(value: &str) -> Result<u32, Report<CollectorError>> {
    let cpu = value
        .trim()
        .parse::<u32>()
        .change_context(CollectorError::ParseError {
            message: format!("invalid CPU number: {value}"),
        })?;
    if cpu > MAX_CPU_ID {
        return Err(Report::new(CollectorError::ParseError {
            message: format!("CPU number out of range: {value}"),
        }));
    }
    Ok(cpu)
}
