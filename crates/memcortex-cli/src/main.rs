use std::path::PathBuf;

use clap::{Parser, Subcommand};
use memcortex::config::Config;
use memcortex_cli::commands::{
    ChatCommand, CompactCommand, ConfigCommand, MemoryCommand, UserCommand,
};
use memcortex_cli::context::CortexContext;
use memcortex_cli::error::CliResult;
use memcortex_cli::output::OutputFormat;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "memcortex")]
#[command(about = "MemCortex - long-term memory for chat assistants")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Store and search memories")]
    Memory(MemoryCommand),

    #[clap(about = "Summarize old memories")]
    Compact(CompactCommand),

    #[clap(about = "User profiles")]
    User(UserCommand),

    #[clap(about = "Send one message to the memory-augmented assistant")]
    Chat(ChatCommand),

    #[clap(about = "Configuration commands")]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    init_logging();

    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }

    if let Command::Config(cmd) = &cli.command {
        return cmd.execute(&config, cli.config.as_deref(), format);
    }

    let context = CortexContext::build(config).await?;
    let manager = &context.manager;

    let result = match &cli.command {
        Command::Memory(cmd) => cmd.execute(manager, format).await,
        Command::Compact(cmd) => cmd.execute(manager, format).await,
        Command::User(cmd) => cmd.execute(manager, format).await,
        Command::Chat(cmd) => cmd.execute(manager, &context.config, format).await,
        Command::Config(_) => Ok(()),
    };

    context.shutdown().await;
    result
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,memcortex=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
