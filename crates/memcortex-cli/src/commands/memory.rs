use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use memcortex::memory::{MemoryManager, MemoryRecord};

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, print_json, truncate_string};

#[derive(Parser)]
pub struct MemoryCommand {
    #[clap(subcommand)]
    pub command: MemorySubcommand,
}

#[derive(Subcommand)]
pub enum MemorySubcommand {
    #[clap(about = "Embed and store a memory")]
    Add(AddArgs),

    #[clap(about = "Find the memories nearest to a query")]
    Search(SearchArgs),

    #[clap(about = "Count live raw memories and summaries")]
    Count(CountArgs),
}

#[derive(Parser)]
pub struct AddArgs {
    #[clap(help = "User ID")]
    pub user: String,

    #[clap(help = "Memory content text")]
    pub text: String,
}

#[derive(Parser)]
pub struct SearchArgs {
    #[clap(help = "User ID")]
    pub user: String,

    #[clap(help = "Search query")]
    pub query: String,
}

#[derive(Parser)]
pub struct CountArgs {
    #[clap(help = "User ID")]
    pub user: String,
}

impl MemoryCommand {
    pub async fn execute(&self, manager: &MemoryManager, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            MemorySubcommand::Add(args) => Self::add(manager, args, format).await,
            MemorySubcommand::Search(args) => Self::search(manager, args, format).await,
            MemorySubcommand::Count(args) => Self::count(manager, args, format).await,
        }
    }

    async fn add(manager: &MemoryManager, args: &AddArgs, format: OutputFormat) -> CliResult<()> {
        let id = manager.save(&args.user, &args.text).await?;

        match format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "id": id.to_string(),
                "user_id": &args.user,
                "content": &args.text,
            }))?,
            OutputFormat::Table => println!("Memory saved: {id}"),
        }

        Ok(())
    }

    async fn search(
        manager: &MemoryManager,
        args: &SearchArgs,
        format: OutputFormat,
    ) -> CliResult<()> {
        let memories = manager.try_retrieve(&args.user, &args.query).await?;

        match format {
            OutputFormat::Json => print_json(&memories)?,
            OutputFormat::Table => print_memories(&memories),
        }

        Ok(())
    }

    async fn count(manager: &MemoryManager, args: &CountArgs, format: OutputFormat) -> CliResult<()> {
        let stats = manager.stats(&args.user).await?;

        match format {
            OutputFormat::Json => print_json(&stats)?,
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["User", "Raw", "Summaries"]);
                table.add_row([
                    args.user.clone(),
                    stats.raw.to_string(),
                    stats.summaries.to_string(),
                ]);
                println!("{table}");
            }
        }

        Ok(())
    }
}

/// Nearest-first table of memories
pub fn print_memories(memories: &[MemoryRecord]) {
    if memories.is_empty() {
        println!("No memories found.");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(["ID", "Kind", "Content", "Created"]);

    for memory in memories {
        table.add_row([
            truncate_string(&memory.id().to_string(), 8),
            memory.kind().to_string(),
            truncate_string(memory.content(), 60),
            format_timestamp(&memory.created_at()),
        ]);
    }

    println!("{table}");
    println!("\nTotal: {} memories", memories.len());
}
