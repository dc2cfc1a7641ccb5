//! Reconciliation engine core (§9: "a single `Engine` value that owns
//! them"). This crate is the engine the binary in `main.rs` drives; it has
//! no HTTP surface of its own (that control plane is out of scope, §1).
//!
//! `Engine` is the one place the process-wide singletons the source scatters
//! across module-level globals live: the scheduler, the single-flight
//! run-exclusion flag, and the queue an external submitter would enqueue
//! into while a run is already executing (§5, §9 "global mutable state").

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fs;
pub mod inventory;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod policies;
pub mod recycle;
pub mod scheduler;
pub mod trackers;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, Mutex};

use cli::Cli;
use error::{Error, Result};
use orchestrator::RunReport;
use scheduler::{ScheduleKind, ScheduledCallback, Scheduler};
use watch::ConfigWatcher;

/// A run submitted while another run is already executing. Queued rather
/// than run concurrently (§5 single-flight); drained once the current run
/// releases the flag.
struct RunRequest {
    responder: oneshot::Sender<Vec<Result<RunReport>>>,
}

#[derive(Default)]
struct RunGuardState {
    running: bool,
    started_at: Option<Instant>,
}

/// Released on every exit from a run, including a panic unwind, by
/// attempting a non-blocking lock in `Drop` rather than an `.await` (§5:
/// "guaranteed-release path ... equivalent of `finally`").
struct RunGuard<'a> {
    state: &'a Mutex<RunGuardState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.state.try_lock() {
            guard.running = false;
            guard.started_at = None;
        }
    }
}

/// Age past which a held single-flight flag is considered stuck rather
/// than a long-running legitimate reconciliation (§5: "older than 1 hour").
const STUCK_RUN_THRESHOLD_SECS: u64 = 60 * 60;

/// Owns the scheduler, the single-flight flag, and the submitted-run queue.
/// One `Engine` per process (§9 design note).
pub struct Engine {
    cli: Cli,
    scheduler: Arc<Scheduler>,
    guard: Mutex<RunGuardState>,
    queue_tx: mpsc::UnboundedSender<RunRequest>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<RunRequest>>,
    config_watcher: Option<ConfigWatcher>,
}

/// Directory the persistent schedule file lives in: alongside whatever
/// directory the configured config-file glob points at, or the current
/// directory for a bare filename/glob.
fn schedule_dir(config_file: &str) -> PathBuf {
    Path::new(config_file)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Engine {
    /// Builds the engine and its scheduler. A `--schedule` flag is mirrored
    /// into `QBT_SCHEDULE` before the scheduler loads so the CLI flag and
    /// the environment variable are interchangeable, matching every other
    /// flag in §6's CLI surface.
    pub async fn new(cli: Cli) -> Arc<Self> {
        if let Some(value) = &cli.schedule {
            if std::env::var("QBT_SCHEDULE").is_err() {
                std::env::set_var("QBT_SCHEDULE", value);
            }
        }

        let scheduler = Scheduler::new_shared(&schedule_dir(&cli.config_file), false).await;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let config_watcher = match ConfigWatcher::new(&cli.config_file) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!("could not start configuration file watcher: {e}");
                None
            }
        };

        Arc::new(Self {
            cli,
            scheduler,
            guard: Mutex::new(RunGuardState::default()),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            config_watcher,
        })
    }

    pub fn cli(&self) -> &Cli {
        &self.cli
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Whether a run is currently executing.
    pub async fn is_running(&self) -> bool {
        self.guard.lock().await.running
    }

    /// True once the currently-running flag has been held longer than
    /// `STUCK_RUN_THRESHOLD_SECS` (§5: "a recovery mechanism, not a
    /// correctness primitive").
    pub async fn is_stuck(&self) -> bool {
        let guard = self.guard.lock().await;
        guard
            .started_at
            .map(|started| started.elapsed().as_secs() > STUCK_RUN_THRESHOLD_SECS)
            .unwrap_or(false)
    }

    /// Operator-triggered recovery: force-clears the flag regardless of
    /// whether anything is actually still running. Never call this as part
    /// of normal control flow.
    pub async fn force_clear_stuck_run(&self) {
        let mut guard = self.guard.lock().await;
        guard.running = false;
        guard.started_at = None;
    }

    /// Submits a run. If the engine is idle, executes immediately and
    /// drains anything enqueued while it ran. If a run is already in
    /// flight, enqueues this submission and awaits its result instead of
    /// racing the in-flight run (§5 single-flight).
    pub async fn submit_run(self: &Arc<Self>) -> Vec<Result<RunReport>> {
        {
            let mut guard = self.guard.lock().await;
            if guard.running {
                drop(guard);
                let (tx, rx) = oneshot::channel();
                if self.queue_tx.send(RunRequest { responder: tx }).is_err() {
                    return vec![Err(Error::Config("run queue closed".to_string()))];
                }
                return rx.await.unwrap_or_default();
            }
            guard.running = true;
            guard.started_at = Some(Instant::now());
        }

        let _release = RunGuard { state: &self.guard };
        let results = self.run_all_configs().await;

        loop {
            let next = self.queue_rx.lock().await.try_recv();
            match next {
                Ok(request) => {
                    let drained = self.run_all_configs().await;
                    let _ = request.responder.send(drained);
                }
                Err(_) => break,
            }
        }

        drop(_release);
        results
    }

    /// Fans the configured glob out to every matching configuration file
    /// and runs each independently; a *Config invalid* or run-fatal error
    /// in one file never prevents the others from being processed (§1, §7).
    async fn run_all_configs(&self) -> Vec<Result<RunReport>> {
        if self.config_watcher.as_ref().map(|w| w.take_changed()).unwrap_or(false) {
            tracing::info!("configuration file changed since the last run, reloading from disk");
        }

        let paths = match glob::glob(&self.cli.config_file) {
            Ok(paths) => paths.filter_map(std::result::Result::ok).collect::<Vec<_>>(),
            Err(e) => {
                tracing::error!("invalid --config-file glob '{}': {e}", self.cli.config_file);
                return vec![Err(Error::Config(e.to_string()))];
            }
        };

        if paths.is_empty() {
            tracing::warn!(pattern = %self.cli.config_file, "no configuration files matched");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            tracing::info!(config = %path.display(), "starting run");
            let result = orchestrator::run_for_config(&path, &self.cli).await;
            if let Err(e) = &result {
                tracing::error!(config = %path.display(), "run failed: {e}");
            }
            results.push(result);
        }
        results
    }

    /// Starts the scheduler loop, wiring `submit_run` as its callback.
    /// No-op if the scheduler has no schedule configured.
    pub async fn start_scheduled(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        let callback: ScheduledCallback = Arc::new(move || {
            let this = Arc::clone(&this);
            Box::pin(async move {
                let _ = this.submit_run().await;
            })
        });
        self.scheduler.start(callback).await
    }

    pub async fn stop_scheduled(&self) {
        self.scheduler.stop().await;
    }

    /// Re-exported for callers constructing a schedule programmatically
    /// (the HTTP control plane this engine doesn't implement would use
    /// this to implement its `PUT /schedule` endpoint).
    pub async fn save_schedule(&self, kind: ScheduleKind) -> Result<()> {
        self.scheduler.save_schedule(kind).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::TempDir;

    fn cli_for(config_file: &str) -> Cli {
        Cli::parse_from(["qbt-reconcile", "--run", "--config-file", config_file])
    }

    #[tokio::test]
    async fn no_matching_config_files_yields_empty_results() {
        let dir = TempDir::new().unwrap();
        let pattern = dir.path().join("*.yml");
        let engine = Engine::new(cli_for(pattern.to_str().unwrap())).await;
        let results = engine.submit_run().await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn second_submission_while_running_is_queued_and_drained() {
        let dir = TempDir::new().unwrap();
        let pattern = dir.path().join("*.yml");
        let engine = Engine::new(cli_for(pattern.to_str().unwrap())).await;

        assert!(!engine.is_running().await);
        let results = engine.submit_run().await;
        assert!(results.is_empty());
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn force_clear_resets_guard_state() {
        let dir = TempDir::new().unwrap();
        let pattern = dir.path().join("*.yml");
        let engine = Engine::new(cli_for(pattern.to_str().unwrap())).await;
        {
            let mut guard = engine.guard.lock().await;
            guard.running = true;
            guard.started_at = Some(Instant::now());
        }
        assert!(engine.is_running().await);
        engine.force_clear_stuck_run().await;
        assert!(!engine.is_running().await);
    }

    #[test]
    fn schedule_dir_falls_back_to_current_dir_for_bare_filename() {
        assert_eq!(schedule_dir("config.yml"), PathBuf::from("."));
    }

    #[test]
    fn schedule_dir_uses_parent_of_globbed_path() {
        assert_eq!(schedule_dir("/etc/qbt/*.yml"), PathBuf::from("/etc/qbt"));
    }

    #[tokio::test]
    async fn config_glob_runs_every_matching_file_independently() {
        let dir = TempDir::new().unwrap();
        for name in ["a.yml", "b.yml"] {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            // Deliberately invalid YAML: each file is expected to fail to
            // load independently rather than abort the whole fan-out.
            writeln!(f, "not: [valid").unwrap();
        }
        let pattern = dir.path().join("*.yml");
        let engine = Engine::new(cli_for(pattern.to_str().unwrap())).await;
        let results = engine.submit_run().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_err()));
    }
}
