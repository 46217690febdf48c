use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use verifier::config::{Config, VERIFIER_DIR};
use verifier::registries::AgentRegistry;
use verifier::telemetry;

mod cli;

use cli::usage::{OutputFormat, Period};

#[derive(Parser)]
#[command(name = "verifier")]
#[command(about = "Runs budget-metered verification agents against staged git changes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose debug output")]
    verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines on stderr")]
    json_logs: bool,

    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Working tree holding the .verifier directory"
    )]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create .verifier/config.yaml and an API key template")]
    Init {
        #[arg(long, help = "Overwrite an existing configuration")]
        force: bool,
    },

    #[command(about = "Run a single agent against the staged change")]
    Run {
        #[arg(help = "Registered agent id, e.g. lint or security-scan")]
        agent_id: String,
    },

    #[command(about = "Run every agent configured for a git hook")]
    Hook {
        #[arg(help = "Hook name, e.g. pre-commit")]
        name: String,
    },

    #[command(about = "List registered agents")]
    Agents,

    #[command(about = "Summarise recorded token usage")]
    TokenUsage {
        #[arg(long, value_enum, default_value = "daily")]
        period: Period,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    #[command(about = "Check git, configuration, provider keys and linters")]
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only log to a file once the working tree has been initialised.
    let log_file = cli
        .root
        .join(VERIFIER_DIR)
        .is_dir()
        .then(|| Config::log_path_in(&cli.root));
    telemetry::init_tracing(cli.verbose, cli.json_logs, log_file.as_deref());

    let options = cli::Options {
        verbose: cli.verbose,
        root: cli.root,
    };
    let registry = Arc::new(AgentRegistry::builtin());

    match cli.command {
        Commands::Init { force } => {
            cli::init(force, &options).await?;
        }
        Commands::Run { agent_id } => {
            cli::run(agent_id, registry, &options).await?;
        }
        Commands::Hook { name } => {
            cli::hook(name, registry, &options).await?;
        }
        Commands::Agents => {
            cli::agents(registry, &options).await?;
        }
        Commands::TokenUsage { period, format } => {
            cli::token_usage(period, format, &options).await?;
        }
        Commands::Doctor => {
            cli::doctor(&options).await?;
        }
    }

    Ok(())
}
