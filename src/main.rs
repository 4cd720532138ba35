use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

use flowgate::cancel::CancelSignal;
use flowgate::config::Config;
use flowgate::demo::{run_compute_demo, run_io_demo, run_order_demo, DemoReport};
use flowgate::{metrics, telemetry, ExecutorConfig};

#[derive(Parser)]
#[command(name = "flowgate")]
#[command(about = "Bounded-concurrency execution and async rate limiting demos", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/flowgate/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demo workload
    Demo {
        #[arg(value_enum)]
        which: DemoKind,
        #[command(flatten)]
        opts: DemoArgs,
    },
    /// Print the effective configuration as TOML
    Config,
    /// Print a shell completion script to stdout
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum DemoKind {
    /// High-concurrency simulated I/O with retry and timeout
    Io,
    /// Rate-limited order submission
    Orders,
    /// CPU-bound kernel on the blocking thread pool
    Compute,
    /// All of the above, in order
    All,
}

#[derive(Args)]
struct DemoArgs {
    /// Number of items (I/O tasks or orders)
    #[arg(short = 'n', long)]
    count: Option<usize>,
    /// Maximum operations in flight
    #[arg(long)]
    concurrency: Option<usize>,
    /// Retries per item
    #[arg(long)]
    retries: Option<u32>,
    /// Per-attempt timeout in milliseconds
    #[arg(long, conflicts_with = "no_timeout")]
    timeout_ms: Option<u64>,
    /// Disable the per-attempt timeout
    #[arg(long)]
    no_timeout: bool,
    /// Order rate in tokens per second
    #[arg(long)]
    rate: Option<f64>,
    /// Iterations for the compute demo
    #[arg(long, default_value = "400000000")]
    iters: u64,
    /// Worker threads for the compute demo (defaults to CPU count)
    #[arg(long)]
    workers: Option<usize>,
    /// Print reports as JSON
    #[arg(long)]
    json: bool,
    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,
}

impl DemoArgs {
    fn executor_config(&self, config: &Config) -> anyhow::Result<ExecutorConfig> {
        let mut settings = config.executor.clone();
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            settings.retries = retries;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            settings.timeout_ms = Some(timeout_ms);
        }
        if self.no_timeout {
            settings.timeout_ms = None;
        }
        Ok(settings.to_executor_config()?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    telemetry::init_tracing(&config.log)?;

    match cli.command {
        Commands::Demo { which, opts } => cmd_demo(which, &opts, &config).await?,
        Commands::Config => cmd_config(&config)?,
        Commands::Completions { shell } => cmd_completions(shell)?,
    }

    Ok(())
}

async fn cmd_demo(which: DemoKind, opts: &DemoArgs, config: &Config) -> anyhow::Result<()> {
    if opts.metrics {
        metrics::init_metrics()?;
    }

    let cancel = CancelSignal::new();
    cancel.listen_for_os_signals();

    if matches!(which, DemoKind::Io | DemoKind::All) {
        print_header(opts, "I/O fan-out");
        let count = opts.count.unwrap_or(10_000);
        let report = run_io_demo(count, opts.executor_config(config)?, &cancel).await?;
        print_report(opts, &report)?;
    }

    if matches!(which, DemoKind::Orders | DemoKind::All) {
        let count = opts.count.unwrap_or(1_000);
        let mut executor = opts.executor_config(config)?;
        // Waiting for tokens is expected here, so only explicit flags bound it.
        if opts.concurrency.is_none() {
            executor.concurrency = count.max(1);
        }
        if opts.timeout_ms.is_none() {
            executor.retry.timeout = None;
        }

        let mut limit = config.limiter.to_rate_limit_config()?;
        if let Some(rate) = opts.rate {
            limit.rate = rate;
            limit.burst = limit.burst.or(Some(rate));
        }
        // Start empty so the configured rate is visible from the first order.
        limit.init_tokens = limit.init_tokens.or(Some(0.0));

        print_header(opts, &format!("Rate-limited orders ({} per second)", limit.rate));
        let report = run_order_demo(count, executor, limit, &cancel).await?;
        print_report(opts, &report)?;
    }

    if matches!(which, DemoKind::Compute | DemoKind::All) {
        let workers = opts.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
        });
        print_header(opts, "CPU-bound compute on blocking pool");
        let report = run_compute_demo(opts.iters, workers).await?;
        print_report(opts, &report)?;
    }

    if opts.metrics {
        print!("{}", metrics::render_metrics());
    }
    Ok(())
}

fn print_header(opts: &DemoArgs, title: &str) {
    if !opts.json {
        println!("=== {} ===", title);
    }
}

fn print_report(opts: &DemoArgs, report: &DemoReport) -> anyhow::Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        println!("{}\n", report);
    }
    Ok(())
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    println!("# {}", Config::config_dir().join("config.toml").display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn cmd_completions(shell: Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
    Ok(())
}
