use analytics::{ArtifactStore, DataSource};
use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL};
use backtester::Backtester;
use configuration::{BacktestConfig, DocumentFormat, Settings, StoreBackend};
use core_types::RunStatus;
use database::{Run, RunStore};
use indicatif::{ProgressBar, ProgressStyle};
use jobs::RunService;
use market_data::CsvDataSource;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The main entry point for the Meridian backtest service.
#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables from .env file, if there is one.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut settings = configuration::load_settings(cli.config.as_deref())?;
    if let Some(backend) = cli.store {
        settings.store.backend = backend;
    }
    let _guard = configuration::init_tracing(&settings.logging);

    match cli.command {
        Commands::Submit(args) => handle_submit(args, &settings).await,
        Commands::Status { run_id } => handle_status(&run_id, &settings).await,
        Commands::Runs { status } => handle_runs(status, &settings).await,
        Commands::Simulate(args) => handle_simulate(args, &settings).await,
        Commands::Serve { addr } => {
            let service = RunService::from_settings(&settings).await?;
            web_server::serve(service, addr.unwrap_or(settings.server.addr)).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Daily-bar portfolio backtests with durable run tracking.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file. Defaults to `meridian.toml` when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured run store backend.
    #[arg(long, global = true, value_enum)]
    store: Option<StoreBackend>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a run document and execute it in this process.
    Submit(SubmitArgs),
    /// Show one run, and its summary once completed.
    Status { run_id: String },
    /// List runs, oldest first.
    Runs {
        /// Only show runs in this state (queued, running, completed, failed).
        #[arg(long)]
        status: Option<RunStatus>,
    },
    /// Simulate a run document in the foreground without recording a run.
    Simulate(SimulateArgs),
    /// Serve the HTTP API.
    Serve {
        /// Overrides `server.addr` from the settings.
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
}

#[derive(Parser)]
struct SubmitArgs {
    /// Path to the run document (JSON or TOML).
    file: PathBuf,

    /// Document format. Inferred from the file extension when omitted.
    #[arg(long)]
    format: Option<String>,

    /// Show progress while the run executes and print its summary.
    #[arg(long)]
    wait: bool,

    /// Give up waiting after this many seconds.
    #[arg(long, requires = "wait")]
    timeout_secs: Option<u64>,
}

#[derive(Parser)]
struct SimulateArgs {
    /// Path to the run document (JSON or TOML).
    file: PathBuf,

    /// Document format. Inferred from the file extension when omitted.
    #[arg(long)]
    format: Option<String>,

    /// Artifact root for this simulation. Defaults to `artifacts.root`.
    #[arg(long)]
    out: Option<PathBuf>,
}

// ==============================================================================
// Command Handlers
// ==============================================================================

/// Runs are executed by this process's job manager, so the command stays
/// attached until the run is terminal either way. The outcome is always
/// reported and a failed run exits non-zero; `--wait` adds a progress spinner
/// and prints the summary of a completed run.
async fn handle_submit(args: SubmitArgs, settings: &Settings) -> anyhow::Result<ExitCode> {
    let (document, format) = read_document(&args.file, args.format.as_deref()).await?;
    let service = RunService::from_settings(settings).await?;
    let run = service.submit(&document, format).await?;
    println!("Submitted run {} ({})", run.run_id, run.name);

    let run = if args.wait {
        let timeout = args.timeout_secs.map(Duration::from_secs);
        wait_with_spinner(&service, &run.run_id, timeout).await?
    } else {
        service.wait_for_terminal(&run.run_id, POLL_INTERVAL, None).await?
    };

    let (code, line) = run_outcome(&run);
    if code == ExitCode::SUCCESS {
        println!("{line}");
        if args.wait {
            let summary = service.summary(&run.run_id, DataSource::Local).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    } else {
        eprintln!("{line}");
    }
    Ok(code)
}

/// The exit code and the line reported for a run `submit` waited on.
fn run_outcome(run: &Run) -> (ExitCode, String) {
    match run.status {
        RunStatus::Completed => (ExitCode::SUCCESS, format!("Run {} completed", run.run_id)),
        RunStatus::Failed => (
            ExitCode::FAILURE,
            format!(
                "Run {} failed: {}",
                run.run_id,
                run.error.as_deref().unwrap_or("no error recorded")
            ),
        ),
        status => (ExitCode::FAILURE, format!("Run {} is still {status}", run.run_id)),
    }
}

async fn read_document(path: &Path, format: Option<&str>) -> anyhow::Result<(String, DocumentFormat)> {
    let format = match format {
        None => DocumentFormat::from_extension(path.extension().and_then(|e| e.to_str())),
        Some("json") => DocumentFormat::Json,
        Some("toml") => DocumentFormat::Toml,
        Some(other) => anyhow::bail!("unsupported document format '{other}'"),
    };
    let document = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok((document, format))
}

async fn wait_with_spinner(
    service: &RunService,
    run_id: &str,
    timeout: Option<Duration>,
) -> anyhow::Result<Run> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    let started = std::time::Instant::now();
    let run = loop {
        let run = service.get_run(run_id).await?;
        spinner.set_message(format!("{run_id}: {}", run.status));
        if run.status.is_terminal() {
            break run;
        }
        if timeout.is_some_and(|t| started.elapsed() >= t) {
            spinner.abandon_with_message(format!("{run_id}: still {}", run.status));
            anyhow::bail!("timed out waiting for run {run_id}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    spinner.finish_with_message(format!("{run_id}: {}", run.status));
    Ok(run)
}

/// Read-only: opens the store without starting a job manager, so runs owned
/// by a serving process are left alone.
async fn handle_status(run_id: &str, settings: &Settings) -> anyhow::Result<ExitCode> {
    let handles = database::open_store(&settings.store).await?;
    let run = handles
        .runs
        .get(run_id)
        .await?
        .with_context(|| format!("run {run_id} was not found"))?;
    println!("{}", serde_json::to_string_pretty(&run)?);

    if let (RunStatus::Completed, Some(dir)) = (run.status, run.artifact_dir.as_deref()) {
        let artifacts = ArtifactStore::from_settings(&settings.artifacts);
        let summary = artifacts.summary(dir, DataSource::Local)?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(match run.status {
        RunStatus::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

/// Runs the engine directly with a progress bar. Nothing is written to the
/// run store; artifacts land in a plain directory.
async fn handle_simulate(args: SimulateArgs, settings: &Settings) -> anyhow::Result<ExitCode> {
    let (document, format) = read_document(&args.file, args.format.as_deref()).await?;
    let config = BacktestConfig::parse(&document, format)?;
    let out = args.out.unwrap_or_else(|| settings.artifacts.root.clone());
    let data = CsvDataSource::new(&settings.data.root);
    let simulation_id = format!("local-{}", database::new_run_id());

    let artifacts = ArtifactStore::new(out);
    let run_dir = artifacts.run_dir(&simulation_id);

    let report = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let (prices, signals) = backtester::load_market_data(&config, &data)?;
        let result = Backtester::new(config.clone())?
            .with_progress(true)
            .run(&prices, &signals)?;
        Ok(artifacts.publish(&simulation_id, &result, &config.output)?)
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("Artifacts written to {}", run_dir.display());
    Ok(ExitCode::SUCCESS)
}

async fn handle_runs(status: Option<RunStatus>, settings: &Settings) -> anyhow::Result<ExitCode> {
    let handles = database::open_store(&settings.store).await?;
    let runs: Vec<Run> = handles
        .runs
        .list()
        .await?
        .into_iter()
        .filter(|run| status.is_none_or(|s| run.status == s))
        .collect();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Run", "Name", "Strategy", "Status", "Submitted", "Finished", "Error",
    ]);
    for run in &runs {
        table.add_row(vec![
            run.run_id.clone(),
            run.name.clone(),
            run.strategy_kind.clone(),
            run.status.to_string(),
            run.submitted_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            run.completed_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            run.error.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    println!("{} run(s)", runs.len());
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use database::RunTransition;

    fn run() -> Run {
        let config = BacktestConfig::parse(
            r#"{
                "start_date": "2024-01-01",
                "end_date": "2024-03-29",
                "initial_cash": "50000",
                "rebalance": { "frequency": "monthly" },
                "strategy": { "kind": "static_universe", "symbols": ["AAA"] }
            }"#,
            DocumentFormat::Json,
        )
        .unwrap();
        let mut run = Run::queued(config);
        run.apply(RunTransition::Start { at: database::timestamp() }).unwrap();
        run
    }

    #[test]
    fn failed_runs_exit_non_zero_with_their_error() {
        let mut run = run();
        run.apply(RunTransition::Fail {
            at: database::timestamp(),
            error: "no prices for ZZZ".into(),
        })
        .unwrap();
        let (code, line) = run_outcome(&run);
        assert_eq!(code, ExitCode::FAILURE);
        assert!(line.contains("failed: no prices for ZZZ"), "{line}");
    }

    #[test]
    fn completed_runs_exit_zero() {
        let mut run = run();
        run.apply(RunTransition::Complete {
            at: database::timestamp(),
            artifact_dir: run.run_id.clone(),
        })
        .unwrap();
        let (code, line) = run_outcome(&run);
        assert_eq!(code, ExitCode::SUCCESS);
        assert!(line.ends_with("completed"), "{line}");
    }

    #[test]
    fn unfinished_runs_are_not_reported_as_success() {
        let (code, line) = run_outcome(&run());
        assert_eq!(code, ExitCode::FAILURE);
        assert!(line.contains("still running"), "{line}");
    }
}
