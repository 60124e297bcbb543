use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use memcortex::memory::{CompactionOutcome, MemoryManager};

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json};

#[derive(Parser)]
pub struct CompactCommand {
    #[clap(subcommand)]
    pub command: CompactSubcommand,
}

#[derive(Subcommand)]
pub enum CompactSubcommand {
    #[clap(about = "Compact only if the user is at or above the threshold")]
    Check(UserArg),

    #[clap(about = "Compact the oldest eligible memories now")]
    Run(UserArg),

    #[clap(about = "Delete superseded memories left by failed deletions")]
    Sweep(UserArg),
}

#[derive(Parser)]
pub struct UserArg {
    #[clap(help = "User ID")]
    pub user: String,
}

impl CompactCommand {
    pub async fn execute(&self, manager: &MemoryManager, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            CompactSubcommand::Check(args) => {
                let outcome = manager.check_and_summarize(&args.user).await?;
                print_outcome(&outcome, format)
            }
            CompactSubcommand::Run(args) => {
                let outcome = manager.summarize_user_memories(&args.user).await?;
                print_outcome(&outcome, format)
            }
            CompactSubcommand::Sweep(args) => {
                let removed = manager.sweep_superseded(&args.user).await?;
                match format {
                    OutputFormat::Json => print_json(&serde_json::json!({
                        "user_id": &args.user,
                        "removed": removed,
                    }))?,
                    OutputFormat::Table => {
                        println!("Removed {removed} superseded memories for {}", args.user)
                    }
                }
                Ok(())
            }
        }
    }
}

fn print_outcome(outcome: &CompactionOutcome, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(outcome)?,
        OutputFormat::Table => {
            println!("Compaction Results");
            println!("==================\n");

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(["Result", "Summary", "Replaced", "Left for sweep"]);

            let (replaced, left) = match outcome {
                CompactionOutcome::Compacted { replaced, .. } => (replaced.len(), 0),
                CompactionOutcome::PartiallyCompacted {
                    deleted, undeleted, ..
                } => (deleted.len(), undeleted.len()),
                _ => (0, 0),
            };
            table.add_row([
                outcome.describe(),
                outcome
                    .summary_id()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                replaced.to_string(),
                left.to_string(),
            ]);

            println!("{table}");
        }
    }

    Ok(())
}
