//! OTA update test runner - Entry Point
//!
//! Runs one update test against the backend on a leased bench device and
//! prints the run report as JSON on stdout.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use otarun::app::options::RunOptions;
use otarun::app::report::RunReport;
use otarun::app::run::Orchestrator;
use otarun::filesys::file::File;
use otarun::http::client::HttpClient;
use otarun::lease::jmp::{DeviceControl, JmpCli};
use otarun::lease::preflight::preflight;
use otarun::logs::{init_logging, LogLevel, LogOptions};
use otarun::models::plan::RunPlan;
use otarun::models::test_run::TestStatus;
use otarun::storage::settings::Settings;
use otarun::utils::version_info;

const EXIT_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(name = "otarun", version, about = "Run an OTA update test on a leased bench device")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one update test end to end
    Run(RunArgs),

    /// Check the device-control tool and exporters only
    Preflight(CommonArgs),

    /// Print version information
    Version,
}

#[derive(Args)]
struct CommonArgs {
    /// Settings file (JSON)
    #[arg(long, default_value = "otarun.json")]
    settings: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<LogLevel>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Run plan file (JSON)
    #[arg(long)]
    plan: PathBuf,

    /// Backend bearer token
    #[arg(long, env = "OTA_BACKEND_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Override the configured backend URL
    #[arg(long)]
    base_url: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Also write the run report to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Command::Version => {
            match serde_json::to_string_pretty(&version_info()) {
                Ok(text) => println!("{text}"),
                Err(e) => eprintln!("Failed to render version info: {e}"),
            }
            0
        }
        Command::Preflight(args) => exit_code(run_preflight(args).await),
        Command::Run(args) => exit_code(run(args).await),
    };

    std::process::exit(code);
}

fn exit_code(result: anyhow::Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "error:".red().bold(), e);
            EXIT_CONFIG
        }
    }
}

async fn load_settings(args: &CommonArgs) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(&args.settings)
        .await
        .with_context(|| format!("unable to load settings from {}", args.settings.display()))?;
    if let Some(level) = &args.log_level {
        settings.log_level = level.clone();
    }
    Ok(settings)
}

fn start_logging(settings: &Settings) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    match init_logging(options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    }
}

fn device_control(settings: &Settings) -> Arc<dyn DeviceControl> {
    Arc::new(JmpCli::with_program(
        settings.device.program.clone(),
        settings.device.command_timeout(),
    ))
}

async fn run_preflight(args: CommonArgs) -> anyhow::Result<i32> {
    let settings = load_settings(&args).await?;
    let _guard = start_logging(&settings);

    let options = RunOptions::try_from(&settings)?;
    let control = device_control(&settings);
    match preflight(control.as_ref(), &options.preflight).await {
        Ok(found) => {
            println!("{}", serde_json::to_string_pretty(&found)?);
            eprintln!("{}", "Preflight OK".green().bold());
            Ok(0)
        }
        Err(e) => {
            error!("Preflight failed: {}", e);
            eprintln!("{} {}", "Preflight failed:".red().bold(), e);
            Ok(1)
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let mut settings = load_settings(&args.common).await?;
    if let Some(base_url) = &args.base_url {
        settings.backend.base_url = base_url.clone();
    }
    if args.insecure {
        settings.backend.verify_tls = false;
    }
    let _guard = start_logging(&settings);

    let Some(token) = args.token else {
        bail!("a backend token is required (--token or OTA_BACKEND_TOKEN)");
    };
    let token = SecretString::from(token);

    let plan = File::new(&args.plan)
        .read_json::<RunPlan>()
        .await
        .with_context(|| format!("unable to load run plan from {}", args.plan.display()))?;

    let options = RunOptions::try_from(&settings)?;
    let http_client = Arc::new(HttpClient::new(settings.client_options(token))?);
    let orchestrator = Orchestrator::new(http_client, device_control(&settings), plan, options);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            await_shutdown_signal().await;
            cancel.cancel();
        }
    });

    info!("Running update test against {}", settings.backend.base_url);
    let report = orchestrator.run(cancel).await;

    print_summary(&report);
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(path) = &args.report {
        write_report(path, &report).await;
    }

    Ok(report.exit_code())
}

async fn write_report(path: &Path, report: &RunReport) {
    if let Err(e) = File::new(path).write_json(report).await {
        warn!("Unable to write the run report to {}: {}", path.display(), e);
    }
}

fn print_summary(report: &RunReport) {
    let status = match report.status {
        TestStatus::Pass => report.status.as_str().green().bold(),
        TestStatus::Fail => report.status.as_str().red().bold(),
    };
    eprintln!("{} {}", status, report.summary);

    if let Some(phase) = report.failed_phase {
        eprintln!(
            "  failed in {} ({})",
            phase.to_string().as_str().yellow(),
            report.error_kind.as_deref().unwrap_or("unknown")
        );
    }
    if let Some(state) = &report.last_state {
        eprintln!("  last deployment state: {state}");
    }
    if let Some(warning) = &report.release_warning {
        eprintln!("  {} {}", "warning:".yellow().bold(), warning);
    }
    for note in &report.notes {
        eprintln!("  note: {note}");
    }
}

/// Resolve once `signal` is delivered
///
/// A listener that could not be installed never resolves, so it cannot
/// cancel a healthy run.
async fn on_signal<F>(name: &str, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!("Unable to listen for {}: {}", name, e);
        std::future::pending::<()>().await;
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let sigterm = async {
            let mut sigterm = signal(SignalKind::terminate())?;
            sigterm
                .recv()
                .await
                .ok_or_else(|| std::io::Error::other("SIGTERM stream closed"))
        };

        tokio::select! {
            _ = on_signal("SIGTERM", sigterm) => {
                info!("SIGTERM received, cancelling the run...");
            }
            _ = on_signal("Ctrl+C", tokio::signal::ctrl_c()) => {
                info!("Ctrl+C received, cancelling the run...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        on_signal("Ctrl+C", tokio::signal::ctrl_c()).await;
        info!("Ctrl+C received, cancelling the run...");
    }
}
