use anyhow::Result;
use clap::Parser;

use swarm_field::cli::commands::agent::AgentCommand;
use swarm_field::cli::commands::bundle::{AttachCommand, BundleCommand};
use swarm_field::cli::commands::deposit::DepositCommand;
use swarm_field::cli::commands::field::{FieldCommand, FieldOp};
use swarm_field::cli::commands::migrate::MigrateCommand;
use swarm_field::cli::commands::status::StatusCommand;
use swarm_field::cli::commands::sweep::SweepCommand;
use swarm_field::cli::commands::{show_how_to_get_work, Command};
use swarm_field::cli::{Cli, Commands};
use swarm_field::config::SwarmFieldConfig;
use swarm_field::observability::field_metrics;
use swarm_field::telemetry::init_telemetry;

fn main() -> Result<()> {
    let cli = Cli::parse();

    SwarmFieldConfig::load_env_file()?;
    let config = match &cli.config {
        Some(path) => SwarmFieldConfig::load_from(path)?,
        None => SwarmFieldConfig::load()?,
    };
    init_telemetry(&config.observability)?;

    let command = cli.command;
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        match command {
            // Default behavior: no subcommand - explain how to get started
            None => show_how_to_get_work().await,
            Some(Commands::Migrate) => MigrateCommand.execute(&config).await,
            Some(Commands::Agent { action }) => AgentCommand::new(action).execute(&config).await,
            Some(Commands::Sense { agent_id, limit }) => {
                FieldCommand::new(FieldOp::Sense { agent_id, limit })
                    .execute(&config)
                    .await
            }
            Some(Commands::Claim { agent_id, node_id }) => {
                FieldCommand::new(FieldOp::Claim { agent_id, node_id })
                    .execute(&config)
                    .await
            }
            Some(Commands::Resolve {
                agent_id,
                node_id,
                failed,
            }) => {
                FieldCommand::new(FieldOp::Resolve {
                    agent_id,
                    node_id,
                    failed,
                })
                .execute(&config)
                .await
            }
            Some(Commands::Release {
                agent_id,
                node_id,
                reason,
            }) => {
                FieldCommand::new(FieldOp::Release {
                    agent_id,
                    node_id,
                    reason,
                })
                .execute(&config)
                .await
            }
            Some(Commands::Block { node_id, blockers }) => {
                FieldCommand::new(FieldOp::Block { node_id, blockers })
                    .execute(&config)
                    .await
            }
            Some(Commands::Boost { node_id, delta }) => {
                FieldCommand::new(FieldOp::Boost { node_id, delta })
                    .execute(&config)
                    .await
            }
            Some(Commands::Approve {
                reviewer_id,
                node_id,
            }) => {
                FieldCommand::new(FieldOp::Approve {
                    reviewer_id,
                    node_id,
                })
                .execute(&config)
                .await
            }
            Some(Commands::Show { node_id }) => {
                FieldCommand::new(FieldOp::Show { node_id })
                    .execute(&config)
                    .await
            }
            Some(Commands::Deposit { file, created_by }) => {
                DepositCommand::new(file, created_by).execute(&config).await
            }
            Some(Commands::Bundle { action }) => BundleCommand::new(action).execute(&config).await,
            Some(Commands::Attach {
                node_id,
                bundle,
                score,
                by,
            }) => {
                AttachCommand {
                    node_id,
                    slug: bundle,
                    score,
                    by,
                }
                .execute(&config)
                .await
            }
            Some(Commands::Sweep { once }) => SweepCommand { once }.execute(&config).await,
            Some(Commands::Status) => StatusCommand.execute(&config).await,
        }
    });

    field_metrics().log_stats();
    result
}
