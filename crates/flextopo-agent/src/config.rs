use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use topology::DEFAULT_CORE_GROUP_SIZE;
use utils::version;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Collect and publish the node topology periodically
    Daemon(DaemonArgs),
    /// Print the local hardware topology as JSON without contacting the cluster
    Inspect(InspectArgs),
}

/// How workload resource state is derived each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UpdateMode {
    /// Mark cores and GPUs that container processes actually run on
    Observed,
    /// Reserve free capacity for the resources pods request
    Declared,
}

#[derive(Parser, Debug, Clone)]
pub struct HardwareArgs {
    #[arg(
        long,
        env = "CORE_GROUP_SIZE",
        default_value_t = DEFAULT_CORE_GROUP_SIZE,
        value_parser = clap::value_parser!(u32).range(1..),
        help = "Number of logical cores per core group"
    )]
    pub core_group_size: u32,

    #[arg(
        long,
        env = "FLEXTOPO_LSCPU_PATH",
        default_value = "lscpu",
        value_hint = clap::ValueHint::CommandName,
        help = "lscpu binary used to enumerate CPUs"
    )]
    pub lscpu_path: PathBuf,

    #[arg(
        long,
        help = "Skip GPU discovery through NVML",
        default_value_t = false
    )]
    pub disable_gpu: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "NODE_NAME",
        help = "Name of this node, used to select pods and name the FlexTopo resource"
    )]
    pub node_name: String,

    #[command(flatten)]
    pub hardware: HardwareArgs,

    #[arg(
        long,
        env = "FLEXTOPO_INTERVAL_SECS",
        default_value = "60",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds between collection cycles"
    )]
    pub interval_secs: u64,

    #[arg(
        long,
        env = "FLEXTOPO_CYCLE_TIMEOUT_SECS",
        default_value = "30",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Upper bound in seconds for one collection cycle"
    )]
    pub cycle_timeout_secs: u64,

    #[arg(
        long,
        env = "FLEXTOPO_UPDATE_MODE",
        value_enum,
        default_value_t = UpdateMode::Observed,
        help = "How workload usage is applied to the topology"
    )]
    pub update_mode: UpdateMode,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "FLEXTOPO_CRICTL_PATH",
        default_value = "crictl",
        value_hint = clap::ValueHint::CommandName,
        help = "crictl binary used to resolve container PIDs"
    )]
    pub crictl_path: PathBuf,

    #[arg(
        long,
        env = "FLEXTOPO_PROC_ROOT",
        default_value = "/proc",
        value_hint = clap::ValueHint::DirPath,
        help = "Mount point of the host proc filesystem"
    )]
    pub proc_root: PathBuf,

    #[arg(
        long,
        env = "FLEXTOPO_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Path for topology metrics in influx line protocol, e.g. /logs/metrics.log"
    )]
    pub metrics_file: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct InspectArgs {
    #[command(flatten)]
    pub hardware: HardwareArgs,

    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Read a previously exported snapshot instead of probing the hardware"
    )]
    pub from: Option<PathBuf>,

    #[arg(long, help = "Pretty-print the JSON output", default_value_t = false)]
    pub pretty: bool,
}
