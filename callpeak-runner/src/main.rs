//! callpeak: peak concurrent external voice calls over an analysis window.
//!
//! # Subcommands
//! - `run`      async analytics jobs, one per chunk
//! - `validate` synchronous details query over the whole window
//! - `chunks`   print the chunk plan without calling the API

use anyhow::Context;
use callpeak_core::config::ChunkFailurePolicy;
use callpeak_core::models::{plan_chunks, AnalysisWindow};
use callpeak_core::CallpeakConfig;
use callpeak_runner::sinks::resolve_output_dir;
use callpeak_runner::{
    run_details_validation, run_peak_analysis, write_outputs, RunContext, RunMode, RunOutcome,
    RunParameters, RunSummary,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(author, version, about = "Peak concurrent call volume from conversation analytics")]
struct Cli {
    /// Optional TOML config file; CALLPEAK__SECTION__KEY env vars override it
    #[arg(short, long, env = "CALLPEAK_CONFIG")]
    config: Option<String>,

    /// Bearer token (overrides api.token)
    #[arg(long, env = "CALLPEAK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// API root, e.g. https://api.mypurecloud.com
    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compute the peak through async analytics jobs
    Run {
        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        tuning: TuningArgs,

        /// Days per job chunk
        #[arg(long)]
        chunk_days: Option<u32>,

        /// abort | skip
        #[arg(long)]
        chunk_failure_policy: Option<ChunkFailurePolicy>,

        /// Jobs allowed in flight at once
        #[arg(long)]
        parallel: Option<usize>,
    },

    /// Compute the peak with a synchronous details query (small windows)
    Validate {
        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// Print the chunk plan for a window
    Chunks {
        #[command(flatten)]
        window: WindowArgs,

        #[arg(long)]
        chunk_days: Option<u32>,
    },
}

#[derive(Debug, Args)]
struct WindowArgs {
    /// Calendar month, YYYY-MM
    #[arg(long, conflicts_with = "interval", required_unless_present = "interval")]
    month: Option<String>,

    /// ISO-8601 interval, start/end
    #[arg(long)]
    interval: Option<String>,
}

impl WindowArgs {
    fn resolve(&self) -> anyhow::Result<AnalysisWindow> {
        match (&self.month, &self.interval) {
            (Some(month), _) => AnalysisWindow::parse_month(month).context("Invalid --month"),
            (None, Some(interval)) => {
                AnalysisWindow::parse_iso_interval(interval).context("Invalid --interval")
            }
            (None, None) => anyhow::bail!("Either --month or --interval is required"),
        }
    }
}

#[derive(Debug, Args)]
struct TuningArgs {
    #[arg(long)]
    page_size: Option<u32>,

    #[arg(long)]
    poll_interval_secs: Option<u64>,

    #[arg(long)]
    max_poll_wait_minutes: Option<u64>,

    /// Count every tel-to-tel voice session, not only external participants
    #[arg(long)]
    loose: bool,

    /// Do not send the mediaType segment filter
    #[arg(long)]
    no_media_filter: bool,

    /// Directory for intervals.csv, per_minute.csv and summary.json
    #[arg(long)]
    output_dir: Option<String>,
}

impl TuningArgs {
    fn apply(&self, config: &mut CallpeakConfig) {
        if let Some(v) = self.page_size {
            config.jobs.page_size = v;
        }
        if let Some(v) = self.poll_interval_secs {
            config.jobs.poll_interval_secs = v;
        }
        if let Some(v) = self.max_poll_wait_minutes {
            config.jobs.max_poll_wait_minutes = v;
        }
        if self.loose {
            config.extractor.loose = true;
        }
        if self.no_media_filter {
            config.jobs.media_type_filter = false;
        }
        if let Some(dir) = &self.output_dir {
            config.run.output_dir = dir.clone();
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = match CallpeakConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(base_url) = &cli.base_url {
        config.api.base_url = base_url.clone();
    }

    let level = config.service.log_level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let result = match &cli.command {
        Commands::Chunks { window, chunk_days } => print_chunks(window, chunk_days.unwrap_or(config.run.chunk_days)),
        Commands::Run {
            window,
            tuning,
            chunk_days,
            chunk_failure_policy,
            parallel,
        } => {
            tuning.apply(&mut config);
            if let Some(v) = chunk_days {
                config.run.chunk_days = *v;
            }
            if let Some(v) = chunk_failure_policy {
                config.run.chunk_failure_policy = *v;
            }
            if let Some(v) = parallel {
                config.run.max_parallel_chunks = *v;
            }
            execute(&config, cli.token.as_deref(), window, RunMode::Jobs).await
        }
        Commands::Validate { window, tuning } => {
            tuning.apply(&mut config);
            execute(&config, cli.token.as_deref(), window, RunMode::Details).await
        }
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        eprintln!("callpeak failed: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn print_chunks(window: &WindowArgs, chunk_days: u32) -> anyhow::Result<()> {
    let window = window.resolve()?;
    let chunks = plan_chunks(&window, chunk_days)?;
    println!("Window {} in {} chunk(s) of up to {} day(s)", window.iso_interval(), chunks.len(), chunk_days);
    for chunk in &chunks {
        println!("  [{}] {}", chunk.index, chunk.iso_interval());
    }
    Ok(())
}

async fn execute(
    config: &CallpeakConfig,
    token: Option<&str>,
    window: &WindowArgs,
    mode: RunMode,
) -> anyhow::Result<()> {
    let window = window.resolve()?;
    let ctx = RunContext::from_config(config, token).context("Failed to set up API client")?;
    let params = RunParameters::from_config(config, window);

    let outcome: RunOutcome = match mode {
        RunMode::Jobs => run_peak_analysis(&ctx, params).await?,
        RunMode::Details => run_details_validation(&ctx, params).await?.0,
    };

    let run_id = uuid::Uuid::new_v4();
    let summary = RunSummary::new(&outcome, run_id, mode, chrono::Utc::now());
    let out_dir = resolve_output_dir(&config.run.output_dir).join(run_id.to_string());
    let paths = write_outputs(&out_dir, &outcome, &summary).context("Failed to write outputs")?;

    println!("Peak concurrent calls: {}", summary.peak_concurrent_calls);
    match &summary.first_peak_minute_utc {
        Some(minute) => println!("First peak minute (UTC): {}", minute),
        None => println!("First peak minute (UTC): none"),
    }
    if !summary.chunks_failed.is_empty() {
        println!("Chunks skipped: {} of {}", summary.chunks_failed.len(), summary.chunks_total);
    }
    println!("Summary: {}", paths.summary.display());
    Ok(())
}
