use std::time::Duration;
use std::time::Instant;

use anyhow::anyhow;
use anyhow::Result;
use kube::Client;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio::time::timeout;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use topology::TopologySummary;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::collector;
use crate::collector::Collector;
use crate::collector::CollectorSettings;
use crate::config::DaemonArgs;
use crate::k8s;
use crate::k8s::Reporter;
use crate::metrics;

/// Periodic collect-and-publish loop for one node.
pub struct Application {
    args: DaemonArgs,
    client: Client,
    collector: Collector,
    reporter: Reporter,
}

impl Application {
    /// Connects to the cluster and prepares the collectors.
    pub async fn build(args: DaemonArgs) -> Result<Self> {
        let client = k8s::init_kube_client(args.kubeconfig.as_deref())
            .await
            .map_err(|e| anyhow!("Failed to initialize Kubernetes client: {e:?}"))?;

        let collector = Collector::new(
            CollectorSettings {
                core_group_size: args.hardware.core_group_size,
                lscpu_path: args.hardware.lscpu_path.clone(),
                crictl_path: args.crictl_path.clone(),
                proc_root: args.proc_root.clone(),
            },
            collector::nvml_inventory(args.hardware.disable_gpu),
        );
        let reporter = Reporter::new(client.clone(), args.node_name.clone());

        Ok(Self {
            args,
            client,
            collector,
            reporter,
        })
    }

    /// Runs collection cycles until SIGTERM or SIGINT.
    pub async fn run(&self) -> Result<()> {
        let token = CancellationToken::new();
        let signal_handler = spawn_signal_handler(token.clone())?;

        self.run_until_cancelled(&token).await;

        signal_handler.abort();
        info!("Application run completed");
        Ok(())
    }

    async fn run_until_cancelled(&self, token: &CancellationToken) {
        let cycle_timeout = Duration::from_secs(self.args.cycle_timeout_secs);
        let mut ticker = interval(Duration::from_secs(self.args.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            node_name = %self.args.node_name,
            interval_secs = self.args.interval_secs,
            update_mode = ?self.args.update_mode,
            "Starting collection loop"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Shutdown requested during collection cycle");
                    break;
                }
                result = timeout(cycle_timeout, self.run_cycle()) => match result {
                    Ok(Ok(summary)) => {
                        let elapsed = started.elapsed();
                        info!(
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Collection cycle completed: {summary}"
                        );
                        metrics::record_topology(
                            &self.args.node_name,
                            &summary,
                            elapsed.as_millis() as u64,
                        );
                    }
                    Ok(Err(e)) => error!("Collection cycle failed: {e:#}"),
                    Err(_) => warn!(
                        timeout_secs = self.args.cycle_timeout_secs,
                        "Collection cycle timed out"
                    ),
                },
            }
        }
    }

    /// Rebuilds the graph from scratch, applies workload state and publishes
    /// it.
    async fn run_cycle(&self) -> Result<TopologySummary> {
        let hardware = self
            .collector
            .collect_hardware()
            .await
            .map_err(|e| anyhow!("Failed to collect hardware: {e:?}"))?;

        let pods = k8s::list_node_pods(&self.client, &self.args.node_name)
            .await
            .map_err(|e| anyhow!("Failed to list pods: {e:?}"))?;

        let graph = self
            .collector
            .populate(&hardware, &pods, self.args.update_mode)
            .await
            .map_err(|e| anyhow!("Failed to build topology: {e:?}"))?;

        let outcome = self
            .reporter
            .report(graph.to_spec())
            .await
            .map_err(|e| anyhow!("Failed to report topology: {e:?}"))?;
        tracing::debug!(%outcome, "Reported topology");

        Ok(graph.summary())
    }
}

fn spawn_signal_handler(token: CancellationToken) -> Result<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::signal;
        use tokio::signal::unix::SignalKind;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
            token.cancel();
        }))
    }
    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, initiating graceful shutdown");
            }
            token.cancel();
        }))
    }
}
