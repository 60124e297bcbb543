use clap::{Parser, Subcommand};
use memcortex::memory::MemoryManager;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json};

#[derive(Parser)]
pub struct UserCommand {
    #[clap(subcommand)]
    pub command: UserSubcommand,
}

#[derive(Subcommand)]
pub enum UserSubcommand {
    #[clap(about = "Create a placeholder profile if the user is unknown")]
    Ensure(UserIdArg),

    #[clap(about = "Show the user's bio")]
    Bio(UserIdArg),

    #[clap(about = "Register a new user and print the generated ID")]
    Register(RegisterArgs),
}

#[derive(Parser)]
pub struct UserIdArg {
    #[clap(help = "User ID")]
    pub user: String,
}

#[derive(Parser)]
pub struct RegisterArgs {
    #[clap(help = "Display name")]
    pub username: String,

    #[clap(help = "Short description of the user")]
    pub bio: String,
}

impl UserCommand {
    pub async fn execute(&self, manager: &MemoryManager, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            UserSubcommand::Ensure(args) => {
                manager.ensure_user_exists(&args.user).await?;
                match format {
                    OutputFormat::Json => {
                        print_json(&serde_json::json!({ "user_id": &args.user, "exists": true }))?
                    }
                    OutputFormat::Table => println!("User {} is registered", args.user),
                }
            }
            UserSubcommand::Bio(args) => {
                let bio = manager.get_user_bio(&args.user).await?;
                match format {
                    OutputFormat::Json => {
                        print_json(&serde_json::json!({ "user_id": &args.user, "bio": bio }))?
                    }
                    OutputFormat::Table => println!("{bio}"),
                }
            }
            UserSubcommand::Register(args) => {
                let user_id = manager.register_user(&args.username, &args.bio).await?;
                match format {
                    OutputFormat::Json => print_json(&serde_json::json!({
                        "user_id": user_id,
                        "username": &args.username,
                        "bio": &args.bio,
                    }))?,
                    OutputFormat::Table => println!("Registered {} as {user_id}", args.username),
                }
            }
        }

        Ok(())
    }
}
