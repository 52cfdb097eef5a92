use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rfm_harvester::config::DEFAULT_BASE_URL;
use rfm_harvester::{Config, Pipeline, RetryConfig};

#[derive(Parser, Debug)]
#[command(about, version, author, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    fetch: FetchArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every pending user into the CSV (default)
    Fetch(FetchArgs),
    /// Count pending identifiers and CSV rows, and report duplicate rows
    Verify(FileArgs),
}

#[derive(Args, Debug, Clone)]
struct FileArgs {
    #[arg(short, long, default_value = "users.csv")]
    output: PathBuf,

    #[arg(short = 'i', long, default_value = "user_ids.txt")]
    pending: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct FetchArgs {
    #[command(flatten)]
    files: FileArgs,

    #[arg(short, long, env = "RFM_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(short = 'p', long, default_value_t = 6)]
    parallel_requests: usize,

    #[arg(short = 'a', long, default_value_t = 3)]
    max_attempts: u32,

    /// Per-request timeout in seconds
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    /// Wait after the first transport failure, in milliseconds
    #[arg(long, default_value_t = 1000)]
    initial_backoff_ms: u64,

    /// Randomly stretch backoff waits
    #[arg(long)]
    jitter: bool,
}

impl FetchArgs {
    fn into_config(self) -> Config {
        Config {
            base_url: self.base_url,
            pending_path: self.files.pending,
            output_path: self.files.output,
            max_concurrent: self.parallel_requests,
            request_timeout: Duration::from_secs(self.timeout),
            retry: RetryConfig {
                max_attempts: self.max_attempts,
                initial_delay: Duration::from_millis(self.initial_backoff_ms),
                jitter: self.jitter,
                ..RetryConfig::default()
            },
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Verify(files)) => verify(files),
        Some(Command::Fetch(args)) => fetch(args).await,
        None => fetch(cli.fetch).await,
    }
}

async fn fetch(args: FetchArgs) -> Result<()> {
    let pipeline = Pipeline::new(args.into_config())?;
    let cancel = CancellationToken::new();

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("interrupt received, letting in-flight fetches finish (press Ctrl-C again to abort)");
        on_interrupt.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::error!("second interrupt, exiting immediately");
            std::process::exit(130);
        }
    });

    let report = pipeline.run(cancel).await?;
    println!("{report:#?}");

    Ok(())
}

fn verify(files: FileArgs) -> Result<()> {
    let report = rfm_harvester::verify(&files.output, &files.pending)?;

    match report.pending {
        Some(n) => println!("pending identifiers in {}: {n}", files.pending.display()),
        None => println!("{} not found", files.pending.display()),
    }
    match report.rows {
        Some(n) => println!("data rows in {} (header excluded): {n}", files.output.display()),
        None => println!("{} not found", files.output.display()),
    }

    if report.is_clean() {
        println!("no duplicate user ids");
        return Ok(());
    }

    println!("duplicate rows:");
    for row in &report.duplicates {
        println!("{}", row.join(","));
    }
    anyhow::bail!("{} duplicate rows found", report.duplicates.len())
}
