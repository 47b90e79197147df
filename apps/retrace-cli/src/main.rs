use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "retrace-cli", about = "inspect a retrace worker's job queue")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "DATABASE_PATH", default_value = "./data/jobs.db")]
    database_path: std::path::PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Print job counts grouped by status.
    Jobs,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let store = match retrace_store::Store::open(&cli.database_path).await {
        Ok(store) => store,
        Err(err) => {
            eprintln!("error: failed to open store at {}: {err}", cli.database_path.display());
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Jobs => run_jobs(&store).await,
    }
}

async fn run_jobs(store: &retrace_store::Store) {
    match store.count_by_status().await {
        Ok(counts) => {
            if counts.is_empty() {
                println!("no jobs in queue");
                return;
            }
            for (status, count) in counts {
                println!("{status:<10} {count}");
            }
        }
        Err(err) => {
            eprintln!("error: failed to read job counts: {err}");
            std::process::exit(1);
        }
    }
}
