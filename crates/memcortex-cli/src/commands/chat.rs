use clap::Parser;
use memcortex::chat::ChatAssistant;
use memcortex::config::Config;
use memcortex::memory::MemoryManager;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json, truncate_string};

#[derive(Parser)]
pub struct ChatCommand {
    #[clap(help = "User ID")]
    pub user: String,

    #[clap(help = "Message to the assistant")]
    pub message: String,
}

impl ChatCommand {
    pub async fn execute(
        &self,
        manager: &MemoryManager,
        config: &Config,
        format: OutputFormat,
    ) -> CliResult<()> {
        let assistant = ChatAssistant::from_config(manager.clone(), config)?;
        let reply = assistant.respond(&self.user, &self.message).await?;

        match format {
            OutputFormat::Json => print_json(&reply)?,
            OutputFormat::Table => {
                println!("{}", reply.response);
                if !reply.related_memories.is_empty() {
                    println!("\nRelated memories:");
                    for memory in &reply.related_memories {
                        println!("  [{}] {}", memory.added, truncate_string(&memory.text, 70));
                    }
                }
            }
        }

        // The reply is out; saving the turn may still fail.
        if let Err(e) = reply.background.wait().await {
            eprintln!("Warning: could not record this turn: {e}");
        }

        Ok(())
    }
}
