use crate::agents::{Agent, AgentRegistration};
use crate::cli::commands::{open_engine, Command};
use crate::cli::AgentAction;
use crate::config::SwarmFieldConfig;
use crate::engine::FieldEngine;
use anyhow::Result;
use chrono::Utc;

pub struct AgentCommand {
    action: AgentAction,
}

impl AgentCommand {
    pub fn new(action: AgentAction) -> Self {
        Self { action }
    }

    async fn run(&self, engine: &FieldEngine) -> Result<()> {
        let registry = engine.registry();
        match &self.action {
            AgentAction::Register {
                agent_type,
                affinity,
                id,
                max_turns,
                checkpoint_at,
            } => {
                let mut registration = AgentRegistration::new(agent_type.clone(), affinity.clone());
                registration.agent_id = id.clone();
                registration.max_turns = *max_turns;
                registration.checkpoint_at = *checkpoint_at;

                let agent = registry.register(registration).await?;
                println!("✅ Registered agent {}", agent.agent_id);
                print_agent(&agent);
                println!();
                println!("💡 Next: swarm-field sense {}", agent.agent_id);
            }
            AgentAction::List { all } => {
                let agents = registry.list(!all).await?;
                if agents.is_empty() {
                    println!("📭 No agents registered");
                    println!("   💡 Register one with: swarm-field agent register coder --affinity rust");
                    return Ok(());
                }
                println!("🤖 {} agents", agents.len());
                println!("──────────");
                for agent in &agents {
                    print_agent(agent);
                    println!();
                }
            }
            AgentAction::Heartbeat {
                agent_id,
                task,
                progress,
                message,
            } => {
                let heartbeat = registry
                    .heartbeat(agent_id, task.as_deref(), *progress, message)
                    .await?;
                println!(
                    "💓 Heartbeat recorded for {} ({:.0}%)",
                    heartbeat.agent_id,
                    heartbeat.progress * 100.0
                );
            }
            AgentAction::WindDown { agent_id } => {
                let agent = registry.wind_down(agent_id).await?;
                println!("🌙 Agent {} is winding down", agent.agent_id);
                if let Some(node) = &agent.current_node_id {
                    println!("   ⏳ Still holding {node}; it will finish that first");
                }
            }
            AgentAction::Finish { agent_id } => {
                let agent = registry.finish(agent_id).await?;
                println!("🏁 Agent {} finished ({})", agent.agent_id, agent.lifecycle_state);
            }
        }
        Ok(())
    }
}

impl Command for AgentCommand {
    async fn execute(&self, config: &SwarmFieldConfig) -> Result<()> {
        let engine = open_engine(config).await?;
        let result = self.run(&engine).await;
        engine.shutdown().await;
        result
    }
}

fn print_agent(agent: &Agent) {
    let silent_for = Utc::now().signed_duration_since(agent.last_heartbeat);
    let affinities: Vec<&str> = agent.affinities.iter().map(String::as_str).collect();

    println!("🤖 {} [{}] - {}", agent.agent_id, agent.agent_type, agent.lifecycle_state);
    println!("   🏷️  Affinities: {}", affinities.join(", "));
    if let Some(node) = &agent.current_node_id {
        println!("   🎯 Working on: {node}");
    }
    println!(
        "   🔁 Turns: {}/{} (checkpoint at {})",
        agent.turn_count, agent.max_turns, agent.checkpoint_at
    );
    println!(
        "   📈 Completed: {}  Failed: {}",
        agent.zones_completed, agent.zones_failed
    );
    println!("   💓 Last heartbeat: {}s ago", silent_for.num_seconds().max(0));
    if let Some(parent) = &agent.parent_agent_id {
        println!("   🔗 Continues: {parent}");
    }
}
