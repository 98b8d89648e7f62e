use crate::bundles::BundleDraft;
use crate::cli::commands::{default_operator, open_engine, Command};
use crate::cli::BundleAction;
use crate::config::SwarmFieldConfig;
use crate::engine::FieldEngine;
use crate::error::FieldError;
use anyhow::{Context, Result};

pub struct BundleCommand {
    action: BundleAction,
}

impl BundleCommand {
    pub fn new(action: BundleAction) -> Self {
        Self { action }
    }

    async fn run(&self, engine: &FieldEngine) -> Result<()> {
        let bundles = engine.bundles();
        match &self.action {
            BundleAction::Add { file } => {
                let raw = std::fs::read_to_string(file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let draft: BundleDraft =
                    serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
                let bundle = bundles.upsert(draft).await?;
                println!("📚 Stored bundle {} ({}) as {}", bundle.slug, bundle.domain, bundle.id);
            }
            BundleAction::List { domain } => {
                let active = bundles.list_active(domain.as_deref()).await?;
                if active.is_empty() {
                    println!("📭 No active bundles");
                    return Ok(());
                }
                println!("📚 {} active bundles", active.len());
                for bundle in &active {
                    let keywords: Vec<&str> = bundle.keywords.iter().map(String::as_str).collect();
                    println!(
                        "   [{}] {} ({}) - {}",
                        bundle.priority,
                        bundle.slug,
                        bundle.domain,
                        keywords.join(", ")
                    );
                }
            }
            BundleAction::Deactivate { slug } => {
                bundles.deactivate(slug).await?;
                println!("🗃️  Bundle {slug} deactivated");
            }
        }
        Ok(())
    }
}

impl Command for BundleCommand {
    async fn execute(&self, config: &SwarmFieldConfig) -> Result<()> {
        let engine = open_engine(config).await?;
        let result = self.run(&engine).await;
        engine.shutdown().await;
        result
    }
}

/// Link a bundle, looked up by slug, to a node
pub struct AttachCommand {
    pub node_id: String,
    pub slug: String,
    pub score: f64,
    pub by: Option<String>,
}

impl AttachCommand {
    async fn run(&self, engine: &FieldEngine) -> Result<()> {
        let bundle = engine
            .bundles()
            .get_by_slug(&self.slug)
            .await?
            .ok_or_else(|| FieldError::NotFound {
                entity: "Bundle",
                id: self.slug.clone(),
            })?;
        let by = self.by.clone().unwrap_or_else(default_operator);

        let attached = engine
            .bundles()
            .attach(&self.node_id, &bundle.id, self.score, &by)
            .await?;
        if attached {
            println!("📎 Attached {} to {}", self.slug, self.node_id);
        } else {
            println!("📎 {} was already attached to {}", self.slug, self.node_id);
        }
        Ok(())
    }
}

impl Command for AttachCommand {
    async fn execute(&self, config: &SwarmFieldConfig) -> Result<()> {
        let engine = open_engine(config).await?;
        let result = self.run(&engine).await;
        engine.shutdown().await;
        result
    }
}
