use crate::cli::commands::Command;
use crate::config::SwarmFieldConfig;
use crate::database::DatabaseManager;
use anyhow::Result;
use std::io::Write;

pub struct MigrateCommand;

impl Command for MigrateCommand {
    async fn execute(&self, config: &SwarmFieldConfig) -> Result<()> {
        println!("🗄️  Migrating {}", config.database.url);

        let mut settings = config.database.clone();
        settings.auto_migrate = false;
        let database = DatabaseManager::new(&settings).await?;

        print!("🔄 Applying migrations... ");
        std::io::stdout().flush()?;
        match database.migrate().await {
            Ok(()) => println!("✅"),
            Err(e) => {
                println!("❌ {e}");
                database.shutdown().await;
                return Err(e.into());
            }
        }

        database.shutdown().await;
        println!("🎯 Field database is ready");
        Ok(())
    }
}
