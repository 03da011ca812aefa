mod app;
mod collector;
mod config;
mod k8s;
mod logging;
mod metrics;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use api_types::FlexTopoSpec;
use clap::Parser;
use topology::Graph;
use utils::version;

use crate::app::Application;
use crate::collector::Collector;
use crate::collector::CollectorSettings;
use crate::config::Cli;
use crate::config::Commands;
use crate::config::DaemonArgs;
use crate::config::InspectArgs;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(daemon_args).await,
        Commands::Inspect(inspect_args) => run_inspect(inspect_args).await,
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let _guard = logging::init(daemon_args.metrics_file.as_deref())?;

    tracing::info!("Starting flextopo agent {}", &**version::VERSION);

    let app = Application::build(daemon_args).await?;
    app.run().await?;

    Ok(())
}

/// Prints the topology of this machine, or of a saved snapshot, as JSON.
async fn run_inspect(inspect_args: InspectArgs) -> Result<()> {
    utils::logging::init();

    let hardware = &inspect_args.hardware;
    let graph = match &inspect_args.from {
        Some(path) => {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read snapshot {}", path.display()))?;
            let spec: FlexTopoSpec = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
            Graph::from_spec(&spec, hardware.core_group_size)
                .with_context(|| format!("invalid snapshot {}", path.display()))?
        }
        None => {
            let collector = Collector::new(
                CollectorSettings {
                    core_group_size: hardware.core_group_size,
                    lscpu_path: hardware.lscpu_path.clone(),
                    crictl_path: Default::default(),
                    proc_root: Default::default(),
                },
                collector::nvml_inventory(hardware.disable_gpu),
            );
            collector
                .collect_hardware()
                .await
                .map_err(|e| anyhow!("Failed to collect hardware: {e:?}"))?
                .build_graph(hardware.core_group_size)
                .map_err(|e| anyhow!("Failed to build topology: {e:?}"))?
        }
    };

    tracing::info!("Topology: {}", graph.summary());

    let spec = graph.to_spec();
    let json = if inspect_args.pretty {
        serde_json::to_string_pretty(&spec)?
    } else {
        serde_json::to_string(&spec)?
    };
    println!("{json}");

    Ok(())
}
