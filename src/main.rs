//! CLI entrypoint: parses flags, wires up tracing, and either runs once or
//! drives the scheduler loop until interrupted. Grounded in the teacher's
//! `init_tracing()` (tracing-subscriber `EnvFilter` + `fmt` layer), adapted
//! to this crate's `--log-level`/`--debug`/`--trace`/`--log-file` surface
//! (§6) instead of the teacher's fixed `RUST_LOG` default.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use qbt_reconcile::cli::Cli;
use qbt_reconcile::Engine;

/// Builds the `EnvFilter` from the effective CLI log level unless `RUST_LOG`
/// is already set, then installs the `fmt` layer — optionally duplicated to
/// a non-blocking file appender when `--log-file` is given. Returns the
/// appender's guard, which must be held for the process lifetime or buffered
/// writes are dropped on exit.
fn init_tracing(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("qbt_reconcile={}", cli.effective_log_level().to_lowercase())));

    let registry = tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer());

    match &cli.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().map(|n| n.to_owned()).unwrap_or_else(|| "qbt-reconcile.log".into());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _tracing_guard = init_tracing(&cli);

    if cli.startup_delay > 0 {
        tracing::info!(seconds = cli.startup_delay, "sleeping before first run");
        tokio::time::sleep(std::time::Duration::from_secs(cli.startup_delay)).await;
    }

    let engine = Engine::new(cli).await;

    if engine.cli().run {
        let results = engine.submit_run().await;
        let had_fatal = results.iter().any(|r| r.is_err());
        log_run_results(&results);
        return if had_fatal { ExitCode::FAILURE } else { ExitCode::SUCCESS };
    }

    if !engine.start_scheduled().await {
        tracing::error!(
            "no schedule configured; pass --schedule, set QBT_SCHEDULE, write a schedule file, or use --run for a one-shot run"
        );
        return ExitCode::FAILURE;
    }

    if let Some(description) = engine.scheduler().get_status().await.next_run_description {
        tracing::info!("{description}");
    }
    tracing::info!("scheduler started, waiting for shutdown signal");
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install Ctrl-C handler, shutting down anyway");
    }
    tracing::info!("shutdown signal received, stopping scheduler");
    engine.stop_scheduled().await;
    ExitCode::SUCCESS
}

fn log_run_results(results: &[qbt_reconcile::error::Result<qbt_reconcile::orchestrator::RunReport>]) {
    for result in results {
        match result {
            Ok(report) => {
                tracing::info!(
                    config = %report.config_path.display(),
                    planned = report.stats.planned,
                    applied = report.stats.applied,
                    errors = report.stats.errors.len(),
                    seconds = report.run_time_seconds,
                    "run completed"
                );
            }
            Err(e) => {
                tracing::error!("run failed: {e}");
            }
        }
    }
}
