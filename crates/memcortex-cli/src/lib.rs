pub mod commands;
pub mod context;
pub mod error;
pub mod output;

pub use commands::{ChatCommand, CompactCommand, ConfigCommand, MemoryCommand, UserCommand};
pub use context::CortexContext;
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, format_timestamp, truncate_string};
