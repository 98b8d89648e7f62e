use crate::cli::commands::{default_operator, open_engine, Command};
use crate::config::SwarmFieldConfig;
use crate::field::{DepositReceipt, NodeDescriptor};
use anyhow::{Context, Result};
use std::path::PathBuf;

pub struct DepositCommand {
    file: PathBuf,
    created_by: Option<String>,
}

impl DepositCommand {
    pub fn new(file: PathBuf, created_by: Option<String>) -> Self {
        Self { file, created_by }
    }

    fn read_tree(&self) -> Result<NodeDescriptor> {
        let raw = std::fs::read_to_string(&self.file)
            .with_context(|| format!("reading {}", self.file.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", self.file.display()))
    }
}

impl Command for DepositCommand {
    async fn execute(&self, config: &SwarmFieldConfig) -> Result<()> {
        let tree = self.read_tree()?;
        let created_by = self.created_by.clone().unwrap_or_else(default_operator);
        println!(
            "🌱 Depositing {} nodes from {} as {created_by}",
            tree.node_count(),
            self.file.display()
        );

        let engine = open_engine(config).await?;
        let result = engine.coordinator().deposit(&tree, &created_by).await;
        engine.shutdown().await;

        match result {
            Ok(receipt) => {
                println!("✅ Deposited:");
                print_receipt(&receipt, 1);
                Ok(())
            }
            Err(e) => {
                println!("❌ Nothing was deposited: {e}");
                Err(e.into())
            }
        }
    }
}

fn print_receipt(receipt: &DepositReceipt, depth: usize) {
    let key = receipt
        .key
        .as_deref()
        .map(|k| format!(" ({k})"))
        .unwrap_or_default();
    println!("{}{} {}{key}", "  ".repeat(depth), receipt.node_type, receipt.id);
    for child in &receipt.children {
        print_receipt(child, depth + 1);
    }
}
