use crate::cli::commands::{open_engine, Command};
use crate::config::SwarmFieldConfig;
use crate::engine::FieldEngine;
use crate::error::FieldError;
use crate::field::{FieldNode, ResolveOutcome, SenseQuery};
use anyhow::Result;

/// Single-node coordination operations
pub enum FieldOp {
    Sense { agent_id: String, limit: Option<usize> },
    Claim { agent_id: String, node_id: String },
    Resolve { agent_id: String, node_id: String, failed: Option<String> },
    Release { agent_id: String, node_id: String, reason: String },
    Block { node_id: String, blockers: Vec<String> },
    Boost { node_id: String, delta: f64 },
    Approve { reviewer_id: String, node_id: String },
    Show { node_id: String },
}

pub struct FieldCommand {
    op: FieldOp,
}

impl FieldCommand {
    pub fn new(op: FieldOp) -> Self {
        Self { op }
    }

    async fn run(&self, engine: &FieldEngine) -> Result<()> {
        let coordinator = engine.coordinator();
        match &self.op {
            FieldOp::Sense { agent_id, limit } => {
                let query = SenseQuery {
                    limit: *limit,
                    ..SenseQuery::default()
                };
                let candidates = coordinator.sense(agent_id, query).await?;
                if candidates.is_empty() {
                    println!("📭 Nothing in the field matches {agent_id}");
                    println!("   💡 Check affinities with: swarm-field agent list");
                    return Ok(());
                }
                println!("👀 {} candidates for {agent_id}, best first:", candidates.len());
                for (rank, node) in candidates.iter().enumerate() {
                    println!(
                        "  {}. [{:.2}] {} {} - {}",
                        rank + 1,
                        node.effective_potential,
                        node.node_type,
                        node.id,
                        node.title
                    );
                    if node.temperature > 0.0 {
                        println!("       🌡️  temperature {:.2}", node.temperature);
                    }
                }
                println!();
                println!("💡 Claim one with: swarm-field claim {agent_id} <node-id>");
            }
            FieldOp::Claim { agent_id, node_id } => match coordinator.claim(agent_id, node_id).await {
                Ok(node) => {
                    println!("🎯 {agent_id} claimed {}", node.id);
                    print_node(&node);
                }
                Err(e @ FieldError::AlreadyClaimed { .. }) => {
                    println!("⚠️  {e}");
                    println!("   💡 Sense again and pick another node");
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            },
            FieldOp::Resolve {
                agent_id,
                node_id,
                failed,
            } => {
                let outcome = match failed {
                    Some(reason) => ResolveOutcome::Failure {
                        reason: reason.clone(),
                    },
                    None => ResolveOutcome::Success,
                };
                let node = coordinator.resolve(agent_id, node_id, outcome).await?;
                if failed.is_some() {
                    println!("🔁 {} reopened (temperature {:.2})", node.id, node.temperature);
                } else {
                    println!("✅ {} resolved by {agent_id}", node.id);
                }
            }
            FieldOp::Release {
                agent_id,
                node_id,
                reason,
            } => {
                let node = coordinator.release(agent_id, node_id, reason).await?;
                println!("🔁 {} released: {reason}", node.id);
                println!("   🌡️  Temperature now {:.2}", node.temperature);
            }
            FieldOp::Block { node_id, blockers } => {
                let node = coordinator.block(node_id, blockers).await?;
                println!("⛔ {} is {}", node.id, node.state);
                for blocker in &node.blocked_by {
                    println!("   ⏳ waiting on {blocker}");
                }
            }
            FieldOp::Boost { node_id, delta } => {
                let node = coordinator.boost(node_id, *delta).await?;
                println!(
                    "🔥 {} temperature {:.2} (effective potential {:.2})",
                    node.id,
                    node.temperature,
                    coordinator.effective_potential_of(&node)
                );
            }
            FieldOp::Approve {
                reviewer_id,
                node_id,
            } => {
                let node = coordinator.approve(reviewer_id, node_id).await?;
                println!("🏅 {} approved by {reviewer_id}", node.id);
            }
            FieldOp::Show { node_id } => {
                let node = coordinator.get_node(node_id).await?;
                print_node(&node);

                let children = coordinator.children(node_id).await?;
                if !children.is_empty() {
                    println!("   👶 Children:");
                    for child in &children {
                        println!("      {} {} [{}] - {}", child.node_type, child.id, child.state, child.title);
                    }
                }

                let bundles = engine.bundles().bundles_for_node(node_id).await?;
                if !bundles.is_empty() {
                    println!("   📚 Bundles:");
                    for attached in &bundles {
                        println!(
                            "      {} ({}, score {:.2})",
                            attached.bundle.slug, attached.bundle.domain, attached.match_score
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

impl Command for FieldCommand {
    async fn execute(&self, config: &SwarmFieldConfig) -> Result<()> {
        let engine = open_engine(config).await?;
        let result = self.run(&engine).await;
        engine.shutdown().await;
        result
    }
}

fn print_node(node: &FieldNode) {
    println!("📋 {} {} - {}", node.node_type, node.id, node.title);
    println!("   📍 State: {}", node.state);
    println!(
        "   ⚡ Potential: {:.2}  🌡️  Temperature: {:.2}",
        node.potential, node.temperature
    );
    if !node.affinity.is_empty() {
        let tags: Vec<&str> = node.affinity.iter().map(String::as_str).collect();
        println!("   🏷️  Affinity: {}", tags.join(", "));
    }
    if let Some(agent) = &node.claimed_by {
        println!("   👤 Claimed by: {agent}");
    }
    if !node.blocked_by.is_empty() {
        let blockers: Vec<&str> = node.blocked_by.iter().map(String::as_str).collect();
        println!("   ⏳ Blocked by: {}", blockers.join(", "));
    }
    if let Some(parent) = &node.parent_id {
        println!("   ⬆️  Parent: {parent}");
    }
}
