use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::info;

use request_governor::config::GovernorConfig;
use request_governor::simulate::{run_simulation, FlakyUpstream, UpstreamBehavior};
use request_governor::{telemetry, RequestGovernor, RetryOptions};

#[derive(Parser, Debug)]
#[command(name = "request-governor", version, about = "Concurrency-limited retries for API calls")]
struct Cli {
    /// YAML configuration file (GOVERNOR__* variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run synthetic calls against a rate-limiting fake upstream
    Simulate(SimulateArgs),
    /// Print the effective configuration as YAML
    ShowConfig,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Number of calls issued at once
    #[arg(long, default_value_t = 10)]
    calls: usize,

    /// 429 responses per call before the upstream succeeds
    #[arg(long, default_value_t = 1)]
    rate_limited_attempts: u32,

    /// Retry-After value sent with each 429
    #[arg(long)]
    retry_after: Option<String>,

    /// Every n-th call fails with 404
    #[arg(long)]
    not_found_every: Option<usize>,

    /// Upstream latency per attempt, in milliseconds
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,

    /// Retries after the first attempt
    #[arg(long)]
    retries: Option<u32>,

    /// Base backoff delay, in milliseconds
    #[arg(long)]
    base_delay_ms: Option<u64>,

    /// Backoff ceiling before jitter, in milliseconds
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Calls allowed to run at once
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Disable backoff jitter
    #[arg(long)]
    no_jitter: bool,

    /// Disable the initial stagger
    #[arg(long)]
    no_stagger: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl SimulateArgs {
    fn retry_options(&self, base: RetryOptions) -> RetryOptions {
        let mut options = base;
        if let Some(retries) = self.retries {
            options = options.retries(retries);
        }
        if let Some(ms) = self.base_delay_ms {
            options = options.base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.max_delay_ms {
            options = options.max_delay(Duration::from_millis(ms));
        }
        if let Some(max_concurrent) = self.max_concurrent {
            options = options.max_concurrent(max_concurrent);
        }
        if self.no_jitter {
            options = options.jitter(false);
        }
        if self.no_stagger {
            options = options.initial_stagger(false);
        }
        options
    }

    fn behavior(&self) -> UpstreamBehavior {
        UpstreamBehavior {
            rate_limited_attempts: self.rate_limited_attempts,
            retry_after: self.retry_after.clone(),
            not_found_every: self.not_found_every,
            latency: Duration::from_millis(self.latency_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = GovernorConfig::load(cli.config.as_deref())?;
    telemetry::init(&config.logging)?;

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &cli.config {
        info!(path = %path.display(), "Loaded governor configuration");
    }

    match cli.command {
        Command::ShowConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Command::Simulate(args) => {
            let options = args.retry_options(config.retry_options());
            options.validate()?;

            let governor = RequestGovernor::new();
            let upstream = FlakyUpstream::new(args.behavior());

            tokio::select! {
                report = run_simulation(&governor, &upstream, args.calls, &options) => {
                    if args.json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        println!(
                            "calls={} succeeded={} failed={} attempts={} peak_concurrency={} elapsed_ms={}",
                            report.calls,
                            report.succeeded,
                            report.failed,
                            report.total_attempts,
                            report.peak_concurrency,
                            report.elapsed_ms,
                        );
                    }
                }
                _ = shutdown_signal() => {
                    let stats = governor.stats();
                    info!(running = stats.running, queued = stats.queued, "Simulation interrupted");
                }
            }
        }
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
