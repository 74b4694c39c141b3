use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use logger::LogOptions;

mod config;
mod database;
mod monitoring;
mod orchestrator;

use config::Config;
use database::LibsqlSink;
use database::repository::SinkDiagnostics;
use monitoring::Scheduler;
use orchestrator::{Orchestrator, build_probes};

#[derive(Parser, Debug)]
#[command(author, version, about = "Router reachability and internet speed monitor", long_about = None)]
struct Args {
    /// TOML config file, overridden by environment variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run checks on the configured interval until interrupted (default)
    Run,
    /// Run a single check cycle and exit
    Once,
    /// Run both probes and print the results as JSON without storing them
    Probe,
    /// Create the results table and indexes
    InitDb,
    /// Show database connectivity and schema information
    CheckDb,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let config = Config::load(args.config.as_ref()).context("Failed to load configuration")?;

    std::fs::create_dir_all(&config.logging.directory).with_context(|| {
        format!("Failed to create log directory {}", config.logging.directory.display())
    })?;
    let _guard = logger::init(&LogOptions::with_file(
        &config.logging.directory,
        &config.logging.file_name,
    ))
    .context("Failed to initialize logging")?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Once => once(config).await,
        Command::Probe => probe(config).await,
        Command::InitDb => init_db(config).await,
        Command::CheckDb => check_db(config).await,
    }
}

async fn run(config: Config) -> anyhow::Result<ExitCode> {
    tracing::info!("Network monitor starting");
    tracing::info!("{}", config);

    let sink = Arc::new(LibsqlSink::new(config.sink.clone()));
    if let Err(e) = sink.initialize().await {
        tracing::warn!("Database setup failed, results may not be stored: {}", e);
    }

    let orchestrator = Arc::new(Orchestrator::from_config(&config, sink)?);
    let scheduler = Scheduler::new(orchestrator, config.schedule.interval());

    match scheduler.run(shutdown_signal()).await {
        Ok(_) => {
            tracing::info!("Network monitor stopped");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!("Scheduler stopped unexpectedly: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn once(config: Config) -> anyhow::Result<ExitCode> {
    let sink = Arc::new(LibsqlSink::new(config.sink.clone()));
    if let Err(e) = sink.initialize().await {
        tracing::warn!("Database setup failed, results may not be stored: {}", e);
    }

    let orchestrator = Orchestrator::from_config(&config, sink)?;
    let report = orchestrator.run_cycle().await;

    Ok(match report.persisted() {
        (true, true) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

async fn probe(config: Config) -> anyhow::Result<ExitCode> {
    let (router, speed) = build_probes(&config)?;
    let (router, speed) = tokio::join!(router.probe(), speed.probe());

    println!("{}", serde_json::to_string_pretty(&[router, speed])?);
    Ok(ExitCode::SUCCESS)
}

async fn init_db(config: Config) -> anyhow::Result<ExitCode> {
    let sink = LibsqlSink::new(config.sink);
    sink.initialize().await.context("Failed to initialize database")?;

    let diagnostics = sink.diagnose().await.context("Failed to inspect database")?;
    println!("Database {} is ready", sink.config().describe());
    print_columns(&diagnostics);
    Ok(ExitCode::SUCCESS)
}

async fn check_db(config: Config) -> anyhow::Result<ExitCode> {
    let sink = LibsqlSink::new(config.sink);
    println!("Database: {}", sink.config().describe());

    let diagnostics = sink.diagnose().await.context("Database check failed")?;
    println!("Engine version: {}", diagnostics.engine_version);

    if !diagnostics.table_exists {
        println!("Table network_checks: missing (run `netcheck init-db`)");
        return Ok(ExitCode::FAILURE);
    }

    print_columns(&diagnostics);
    if let Some(rows) = diagnostics.row_count {
        println!("Stored results: {}", rows);
    }

    match sink.latest().await.context("Failed to read the latest result")? {
        Some(stored) => {
            println!("Latest result (id {}, stored {}):", stored.id, stored.created_at);
            println!("  {}", stored.result.summary());
        }
        None => println!("Latest result: none stored yet"),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_columns(diagnostics: &SinkDiagnostics) {
    println!("Table network_checks:");
    for (name, declared) in &diagnostics.columns {
        println!("  {} {}", name, declared);
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
