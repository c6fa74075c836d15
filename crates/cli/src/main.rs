//! OpenOrca CLI, the main entry point.
//!
//! Commands:
//! - `agent`   Interactive chat or single-message mode
//! - `config`  Validate, show or initialize the configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "openorca",
    about = "OpenOrca, an autonomous coding agent for local LLMs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the coding agent
    Agent {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Project directory the tools operate on
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Block tools that modify the workspace
        #[arg(long)]
        plan: bool,

        /// Block shell commands
        #[arg(long)]
        sandbox: bool,

        /// Parse tool calls from text instead of the structured API
        #[arg(long)]
        no_native_tools: bool,

        /// Print the model's reasoning
        #[arg(long)]
        show_thinking: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Check the configuration file
    Validate,
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Agent {
            message,
            model,
            workspace,
            plan,
            sandbox,
            no_native_tools,
            show_thinking,
        } => {
            commands::agent::run(commands::agent::AgentOptions {
                message,
                model,
                workspace,
                plan,
                sandbox,
                native_tools: !no_native_tools,
                show_thinking,
                verbose: cli.verbose,
            })
            .await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate()?,
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Init { force } => commands::config_cmd::init(force)?,
        },
    }

    Ok(())
}
