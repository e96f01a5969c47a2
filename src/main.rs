use anyhow::Result;
use clap::{Parser, Subcommand};
use insider_replay::commands::{cancel_job, delete_job, list_jobs, run_backtest, show_results};
use insider_replay::context::AppContext;
use insider_replay::models::SignalSourceKind;
use log::info;
use std::env;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "insider-replay")]
#[command(about = "Replays historical insider-trading signals against generated exit-rule scenarios")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a backtest job and drive it to a terminal state
    Run {
        /// Owning user id
        #[arg(long)]
        user: String,
        /// Human-readable job name
        #[arg(long)]
        name: String,
        /// Signal source (chat-feed or public-filings)
        #[arg(long)]
        source: SignalSourceKind,
        /// Number of historical signals to fetch
        #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..=2000))]
        count: u32,
    },
    /// List a user's jobs with status and progress
    Jobs {
        #[arg(long)]
        user: String,
    },
    /// Show a job's top scenarios ranked by total P&L
    Results {
        job_id: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Request cooperative cancellation of a running job
    Cancel { job_id: Uuid },
    /// Delete a job and everything stored for it
    Delete { job_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let database_url = env::var("DATABASE_URL").ok();
    let app_context = AppContext::initialize(database_url);

    info!("Starting insider-replay. Historical replay only; not financial advice.");

    match cli.command {
        Commands::Run {
            user,
            name,
            source,
            count,
        } => {
            run_backtest::run(&app_context, &user, &name, source, count).await?;
        }
        Commands::Jobs { user } => {
            list_jobs::run(&app_context, &user).await?;
        }
        Commands::Results { job_id, limit } => {
            show_results::run(&app_context, job_id, limit).await?;
        }
        Commands::Cancel { job_id } => {
            cancel_job::run(&app_context, job_id).await?;
        }
        Commands::Delete { job_id } => {
            delete_job::run(&app_context, job_id).await?;
        }
    }

    Ok(())
}
