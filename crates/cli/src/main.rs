use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::{CheckConfigArgs, MigrateArgs, NormalizeArgs, PollOnceArgs, RunArgs};

#[derive(Parser)]
#[command(name = "tradewatch")]
#[command(about = "Change-detection poller for exchange accounts", long_about = None)]
struct Cli {
    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every active instance until interrupted
    Run(RunArgs),
    /// Run a single poll cycle for one instance
    PollOnce(PollOnceArgs),
    /// Show how symbols normalize and match a trading pair
    Normalize(NormalizeArgs),
    /// Print the effective configuration with secrets masked
    CheckConfig(CheckConfigArgs),
    /// Apply database migrations
    Migrate(MigrateArgs),
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter()).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    match cli.command {
        Commands::Run(args) => commands::run_scheduler(args).await?,
        Commands::PollOnce(args) => commands::run_poll_once(args).await?,
        Commands::Normalize(args) => commands::run_normalize(&args)?,
        Commands::CheckConfig(args) => commands::run_check_config(&args)?,
        Commands::Migrate(args) => commands::run_migrate(args).await?,
    }

    Ok(())
}
