use std::path::Path;

use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use memcortex::config::Config;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json};

#[derive(Parser)]
pub struct ConfigCommand {
    #[clap(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    #[clap(about = "Show the effective configuration (file, then environment)")]
    Show,
}

impl ConfigCommand {
    pub fn execute(
        &self,
        config: &Config,
        config_path: Option<&Path>,
        format: OutputFormat,
    ) -> CliResult<()> {
        match &self.command {
            ConfigSubcommand::Show => Self::show(config, config_path, format),
        }
    }

    fn show(config: &Config, config_path: Option<&Path>, format: OutputFormat) -> CliResult<()> {
        match format {
            OutputFormat::Json => print_json(&config_json(config))?,
            OutputFormat::Table => {
                match config_path {
                    Some(path) => println!("Configuration from: {}", path.display()),
                    None => println!("Configuration: (default lookup)"),
                }
                println!("==============================\n");

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Setting", "Value"]);

                for (key, value) in config_rows(config) {
                    table.add_row([key.to_string(), value]);
                }

                println!("{table}");
            }
        }

        Ok(())
    }
}

fn config_json(config: &Config) -> serde_json::Value {
    serde_json::json!({
        "storage": {
            "data_dir": config.storage.data_dir.display().to_string(),
        },
        "embedding": {
            "provider": config.embedding.provider,
            "base_url": config.embedding.base_url,
            "model": config.embedding.model,
            "dimension": config.embedding.dimension,
            "workers": config.embedding.workers,
            "queue_capacity": config.embedding.queue_capacity,
            "max_attempts": config.embedding.max_attempts,
            "backoff_unit_ms": config.embedding.backoff_unit_ms,
            "timeout_secs": config.embedding.timeout_secs,
        },
        "retrieval": {
            "top_k": config.retrieval.top_k,
            "prompt_limit": config.retrieval.prompt_limit,
        },
        "compaction": {
            "enabled": config.compaction.enabled,
            "threshold": config.compaction.threshold,
            "batch_size": config.compaction.batch_size,
            "max_age_days": config.compaction.max_age_days,
        },
        "summarizer": {
            "base_url": config.summarizer.base_url,
            "model": config.summarizer.model,
            "timeout_secs": config.summarizer.timeout_secs,
        },
        "chat": {
            "model": config.chat.model,
            "default_bio": config.chat.default_bio,
        },
        "background": {
            "capacity": config.background.capacity,
        }
    })
}

fn config_rows(config: &Config) -> Vec<(&'static str, String)> {
    vec![
        ("storage.data_dir", config.storage.data_dir.display().to_string()),
        ("embedding.provider", config.embedding.provider.clone()),
        ("embedding.base_url", config.embedding.base_url.clone()),
        ("embedding.model", config.embedding.model.clone()),
        ("embedding.dimension", config.embedding.dimension.to_string()),
        ("embedding.workers", config.embedding.workers.to_string()),
        ("embedding.queue_capacity", config.embedding.queue_capacity.to_string()),
        ("embedding.max_attempts", config.embedding.max_attempts.to_string()),
        ("embedding.backoff_unit_ms", config.embedding.backoff_unit_ms.to_string()),
        ("embedding.timeout_secs", config.embedding.timeout_secs.to_string()),
        ("retrieval.top_k", config.retrieval.top_k.to_string()),
        ("retrieval.prompt_limit", config.retrieval.prompt_limit.to_string()),
        ("compaction.enabled", config.compaction.enabled.to_string()),
        ("compaction.threshold", config.compaction.threshold.to_string()),
        ("compaction.batch_size", config.compaction.batch_size.to_string()),
        ("compaction.max_age_days", config.compaction.max_age_days.to_string()),
        ("summarizer.base_url", config.summarizer.base_url.clone()),
        ("summarizer.model", config.summarizer.model.clone()),
        ("summarizer.timeout_secs", config.summarizer.timeout_secs.to_string()),
        ("chat.model", config.chat.model.clone()),
        ("chat.default_bio", config.chat.default_bio.clone()),
        ("background.capacity", config.background.capacity.to_string()),
    ]
}
