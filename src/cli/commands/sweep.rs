use crate::agents::SweepReport;
use crate::cli::commands::{open_engine, Command};
use crate::config::SwarmFieldConfig;
use crate::shutdown::ShutdownCoordinator;
use anyhow::Result;

pub struct SweepCommand {
    pub once: bool,
}

impl Command for SweepCommand {
    async fn execute(&self, config: &SwarmFieldConfig) -> Result<()> {
        let engine = open_engine(config).await?;

        if self.once {
            println!(
                "🧹 Sweeping agents silent for more than {}s",
                config.liveness.heartbeat_timeout_secs
            );
            let result = engine.sweeper().sweep_once().await;
            engine.shutdown().await;
            print_report(&result?);
            return Ok(());
        }

        println!(
            "🧹 Sweeping every {}s (timeout {}s). Press Ctrl-C to stop.",
            config.liveness.sweep_interval().as_secs(),
            config.liveness.heartbeat_timeout_secs
        );
        let mut shutdown = ShutdownCoordinator::new();
        let signals = shutdown.install_signal_handlers();

        let sweeper = engine.sweeper().clone();
        let receiver = shutdown.subscribe();
        shutdown.track(
            "liveness sweeper",
            tokio::spawn(async move { sweeper.run(receiver).await }),
        );

        shutdown.wait_for_shutdown().await;
        signals.abort();
        let stopped = shutdown.shutdown_all_services().await;
        engine.shutdown().await;
        println!("👋 Sweeper stopped");
        stopped
    }
}

fn print_report(report: &SweepReport) {
    if report.reclaimed.is_empty() && report.failed.is_empty() {
        println!("✨ No stale agents ({} examined)", report.scanned);
        return;
    }
    for reclaimed in &report.reclaimed {
        println!(
            "💀 {} terminated, {} nodes reopened",
            reclaimed.agent_id,
            reclaimed.node_ids.len()
        );
        for node in &reclaimed.node_ids {
            println!("   🔁 {node}");
        }
    }
    for (agent_id, error) in &report.failed {
        println!("❌ {agent_id}: {error}");
    }
    println!();
    println!(
        "📊 {} agents reclaimed, {} nodes reopened",
        report.reclaimed.len(),
        report.reopened_nodes()
    );
}
