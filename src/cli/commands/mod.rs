use crate::config::SwarmFieldConfig;
use crate::engine::FieldEngine;
use anyhow::Result;
use std::io::Write;

pub mod agent;
pub mod bundle;
pub mod deposit;
pub mod field;
pub mod migrate;
pub mod status;
pub mod sweep;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self, config: &SwarmFieldConfig) -> Result<()>;
}

/// Open the engine with a progress line, the way every command starts
pub async fn open_engine(config: &SwarmFieldConfig) -> Result<FieldEngine> {
    print!("🔄 Opening field database... ");
    std::io::stdout().flush()?;

    match FieldEngine::open(config).await {
        Ok(engine) => {
            println!("✅");
            Ok(engine)
        }
        Err(e) => {
            println!("❌ Failed to open {}: {e}", config.database.url);
            Err(e.into())
        }
    }
}

/// Creator recorded for operator actions when none is given
pub fn default_operator() -> String {
    match hostname::get() {
        Ok(host) => format!("operator@{}", host.to_string_lossy()),
        Err(_) => "operator".to_string(),
    }
}

pub async fn show_how_to_get_work() -> Result<()> {
    println!("🌡️  Swarm Field - field-based task coordination");
    println!();
    println!("To get started:");
    println!("  🌱 swarm-field deposit --file plan.json   # Seed the field with work");
    println!("  🤖 swarm-field agent register coder --affinity rust");
    println!("  👀 swarm-field sense <agent-id>           # See the hottest matching nodes");
    println!("  🎯 swarm-field claim <agent-id> <node-id> # Take a node");
    println!("  ✅ swarm-field resolve <agent-id> <node-id>");
    println!();
    println!("Operator commands:");
    println!("  📊 swarm-field status                     # Field and agent overview");
    println!("  🧹 swarm-field sweep                      # Reclaim work from dead agents");
    println!();
    println!("💡 Run 'swarm-field --help' for every command");
    Ok(())
}
