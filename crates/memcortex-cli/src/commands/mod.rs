pub mod chat;
pub mod compact;
pub mod config;
pub mod memory;
pub mod user;

pub use chat::ChatCommand;
pub use compact::CompactCommand;
pub use config::ConfigCommand;
pub use memory::MemoryCommand;
pub use user::UserCommand;
