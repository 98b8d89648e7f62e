use crate::agents::LifecycleState;
use crate::cli::commands::{open_engine, Command};
use crate::config::SwarmFieldConfig;
use crate::engine::FieldEngine;
use crate::field::NodeState;
use anyhow::Result;
use chrono::Utc;

pub struct StatusCommand;

impl StatusCommand {
    async fn run(&self, engine: &FieldEngine, config: &SwarmFieldConfig) -> Result<()> {
        println!();
        println!("🌡️  FIELD OVERVIEW:");
        println!("──────────────────");
        let summary = engine.coordinator().field_summary().await?;
        println!("   🟢 Open: {}", summary.open);
        println!("   🎯 Claimed: {}", summary.claimed);
        println!("   ⏳ Blocked: {}", summary.blocked);
        println!("   ✅ Resolved: {}", summary.resolved);
        println!("   🏅 Approved: {}", summary.approved);
        println!("   📦 Total: {}", summary.total());
        println!();

        let open = engine.coordinator().list_nodes(Some(NodeState::Open)).await?;
        if let Some(hottest) = open.iter().max_by(|a, b| a.temperature.total_cmp(&b.temperature)) {
            if hottest.temperature > 0.0 {
                println!(
                    "   🔥 Hottest open node: {} ({:.2}) - {}",
                    hottest.id, hottest.temperature, hottest.title
                );
                println!();
            }
        }

        println!("🤖 AGENTS:");
        println!("─────────");
        let agents = engine.registry().list(true).await?;
        if agents.is_empty() {
            println!("   📭 No live agents");
        }
        let timeout = chrono::Duration::from_std(config.liveness.heartbeat_timeout())
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let now = Utc::now();
        for agent in &agents {
            let stale = now.signed_duration_since(agent.last_heartbeat) > timeout;
            let marker = match (stale, agent.lifecycle_state) {
                (true, _) => "💀",
                (false, LifecycleState::Working) => "🔴",
                (false, LifecycleState::Active) => "🟢",
                _ => "🟡",
            };
            let node = agent
                .current_node_id
                .as_deref()
                .map(|n| format!(" on {n}"))
                .unwrap_or_default();
            println!("   {marker} {} - {}{node}", agent.agent_id, agent.lifecycle_state);
        }
        if agents.iter().any(|a| now.signed_duration_since(a.last_heartbeat) > timeout) {
            println!();
            println!("   💡 Stale agents found; reclaim with: swarm-field sweep --once");
        }
        println!();

        println!("📚 BUNDLES:");
        println!("──────────");
        let bundles = engine.bundles().list_active(None).await?;
        println!("   {} active", bundles.len());
        Ok(())
    }
}

impl Command for StatusCommand {
    async fn execute(&self, config: &SwarmFieldConfig) -> Result<()> {
        println!("🌡️  SWARM FIELD STATUS");
        println!("=====================");
        let engine = open_engine(config).await?;
        let result = self.run(&engine, config).await;
        engine.shutdown().await;
        result
    }
}
