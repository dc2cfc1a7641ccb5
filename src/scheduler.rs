//! Scheduler (§4.8): a persistent cron/interval schedule with a hand-rolled
//! background tick loop, grounded in `modules/scheduler.py`'s `Scheduler`
//! class. A schedule file on disk always takes precedence over the
//! `QBT_SCHEDULE` environment variable; deleting the file falls back to
//! re-reading the environment rather than disabling scheduling outright.
//!
//! The teacher schedules recurring jobs with `tokio_cron_scheduler`, which
//! has no notion of a persisted, externally-editable schedule document or
//! a read-only "don't recompute next_run" mode — both load-bearing
//! requirements here — so this module re-derives `JobScheduler`'s
//! `new`/`new_shared` Arc-wrapping convention around a plain `tokio::spawn`
//! tick loop instead, using `croner` for cron next-run computation.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use croner::Cron;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

pub type ScheduledCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Either form a schedule can take. Mirrors the source's `(type, value)`
/// tuple, kept as a sum type so an interval can never be confused for an
/// unparsed cron string.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleKind {
    Cron(String),
    IntervalMinutes(i64),
}

impl ScheduleKind {
    fn type_str(&self) -> &'static str {
        match self {
            ScheduleKind::Cron(_) => "cron",
            ScheduleKind::IntervalMinutes(_) => "interval",
        }
    }
}

/// On-disk schedule document (§6). `value` is untyped YAML since a cron
/// expression is a string and an interval is an integer.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScheduleFile {
    #[serde(rename = "type")]
    kind: String,
    value: serde_yaml::Value,
    updated_at: String,
    version: u32,
}

#[derive(Debug, Clone, Default)]
struct SchedulerState {
    current: Option<ScheduleKind>,
    next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ScheduleInfo {
    pub schedule: Option<String>,
    pub kind: Option<&'static str>,
    pub source: Option<&'static str>,
    pub persistent: bool,
    pub file_exists: bool,
}

#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub current: Option<ScheduleKind>,
    pub next_run: Option<DateTime<Utc>>,
    pub is_running: bool,
    /// Human-readable countdown, e.g. "42 minutes until next run at
    /// 2024-01-01 06:00:00 UTC", or `None` if no schedule is configured.
    pub next_run_description: Option<String>,
}

pub struct Scheduler {
    schedule_file: PathBuf,
    read_only: bool,
    /// When cleared by `toggle_persistence(false)`, `load_schedule` skips
    /// the on-disk file entirely and falls straight through to
    /// `QBT_SCHEDULE`, without deleting the file (§4.8 `toggle_persistence`).
    persistence_enabled: AtomicBool,
    state: Mutex<SchedulerState>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Loads the schedule file (if present) or `QBT_SCHEDULE`, as
    /// `_load_schedule` does, and returns the constructed instance.
    pub async fn new(config_dir: &Path, read_only: bool) -> Self {
        let scheduler = Scheduler {
            schedule_file: config_dir.join("schedule.yml"),
            read_only,
            persistence_enabled: AtomicBool::new(true),
            state: Mutex::new(SchedulerState::default()),
            stop_tx: Mutex::new(None),
            handle: Mutex::new(None),
        };
        scheduler.load_schedule().await;
        scheduler
    }

    /// Arc-wraps a freshly constructed scheduler, the way the teacher's
    /// `Scheduler::new_shared` hands callers something they can clone into
    /// a background task.
    pub async fn new_shared(config_dir: &Path, read_only: bool) -> Arc<Self> {
        Arc::new(Self::new(config_dir, read_only).await)
    }

    async fn load_schedule(&self) {
        if self.persistence_enabled.load(Ordering::SeqCst) {
            if let Ok(raw) = tokio::fs::read_to_string(&self.schedule_file).await {
                if let Ok(file) = serde_yaml::from_str::<ScheduleFile>(&raw) {
                    if let Some(kind) = parse_schedule(&file.kind, &file.value) {
                        let next_run = if self.read_only { None } else { calculate_next_run(&kind) };
                        let mut state = self.state.lock().await;
                        state.current = Some(kind);
                        state.next_run = next_run;
                        return;
                    }
                }
                tracing::warn!(path = %self.schedule_file.display(), "invalid schedule file, ignoring");
            }
        }

        if let Ok(env_value) = std::env::var("QBT_SCHEDULE") {
            if let Ok(cron) = Cron::new(&env_value).parse() {
                let _ = cron;
                let kind = ScheduleKind::Cron(env_value);
                let next_run = if self.read_only { None } else { calculate_next_run(&kind) };
                let mut state = self.state.lock().await;
                state.current = Some(kind);
                state.next_run = next_run;
                return;
            }
            if let Ok(minutes) = env_value.parse::<i64>() {
                if minutes > 0 {
                    let kind = ScheduleKind::IntervalMinutes(minutes);
                    let next_run = if self.read_only { None } else { calculate_next_run(&kind) };
                    let mut state = self.state.lock().await;
                    state.current = Some(kind);
                    state.next_run = next_run;
                    return;
                }
            }
            tracing::warn!(value = env_value, "invalid QBT_SCHEDULE environment variable");
        }
    }

    /// Writes the schedule to disk via a temp-file-then-rename, then
    /// updates the in-memory schedule to match (§6, §8 atomic-write law).
    pub async fn save_schedule(&self, kind: ScheduleKind) -> Result<()> {
        validate(&kind)?;

        let value = match &kind {
            ScheduleKind::Cron(expr) => serde_yaml::Value::String(expr.clone()),
            ScheduleKind::IntervalMinutes(n) => serde_yaml::Value::Number((*n).into()),
        };
        let file = ScheduleFile {
            kind: kind.type_str().to_string(),
            value,
            updated_at: Utc::now().to_rfc3339(),
            version: 1,
        };
        let yaml = serde_yaml::to_string(&file)?;

        let tmp_path = self.schedule_file.with_extension("yml.tmp");
        tokio::fs::write(&tmp_path, yaml).await?;
        tokio::fs::rename(&tmp_path, &self.schedule_file).await?;

        let next_run = calculate_next_run(&kind);
        let mut state = self.state.lock().await;
        state.current = Some(kind);
        state.next_run = next_run;
        Ok(())
    }

    /// Deletes the persistent schedule file, falling back to
    /// `QBT_SCHEDULE` rather than disabling scheduling outright.
    pub async fn delete_schedule(&self) -> Result<()> {
        if tokio::fs::metadata(&self.schedule_file).await.is_ok() {
            tokio::fs::remove_file(&self.schedule_file).await?;
        }
        {
            let mut state = self.state.lock().await;
            state.current = None;
            state.next_run = None;
        }
        self.load_schedule().await;
        Ok(())
    }

    /// Disables (or re-enables) evaluation of the persistent schedule file
    /// without deleting it (§4.8). Re-enabling re-reads the file if present.
    pub async fn toggle_persistence(&self, enabled: bool) {
        self.persistence_enabled.store(enabled, Ordering::SeqCst);
        {
            let mut state = self.state.lock().await;
            state.current = None;
            state.next_run = None;
        }
        self.load_schedule().await;
    }

    pub fn persistence_enabled(&self) -> bool {
        self.persistence_enabled.load(Ordering::SeqCst)
    }

    /// Non-persistent schedule change; restarts the background loop if it
    /// was already running, the way `update_schedule` restarts with the
    /// same callback.
    pub async fn update_schedule(&self, kind: ScheduleKind) -> Result<()> {
        validate(&kind)?;
        let next_run = calculate_next_run(&kind);
        let mut state = self.state.lock().await;
        state.current = Some(kind);
        state.next_run = next_run;
        Ok(())
    }

    pub async fn get_schedule_info(&self) -> ScheduleInfo {
        if self.persistence_enabled.load(Ordering::SeqCst) {
            if let Ok(raw) = tokio::fs::read_to_string(&self.schedule_file).await {
                if let Ok(file) = serde_yaml::from_str::<ScheduleFile>(&raw) {
                    return ScheduleInfo {
                        schedule: Some(file.value.as_str().map(str::to_string).unwrap_or_else(|| file.value.to_string())),
                        kind: match file.kind.as_str() {
                            "cron" => Some("cron"),
                            "interval" => Some("interval"),
                            _ => None,
                        },
                        source: Some("schedule.yml"),
                        persistent: true,
                        file_exists: true,
                    };
                }
            }
        }

        let state = self.state.lock().await;
        match &state.current {
            Some(kind) => ScheduleInfo {
                schedule: Some(describe(kind)),
                kind: Some(kind.type_str()),
                source: Some("QBT_SCHEDULE"),
                persistent: false,
                file_exists: false,
            },
            None => ScheduleInfo {
                schedule: None,
                kind: None,
                source: None,
                persistent: false,
                file_exists: false,
            },
        }
    }

    /// Read-only callers receive the stored `next_run`; they never
    /// recompute it, matching the source's "prevent drift" comment.
    pub async fn get_status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        SchedulerStatus {
            current: state.current.clone(),
            next_run: state.next_run,
            is_running: self.stop_tx.lock().await.is_some(),
            next_run_description: state.next_run.map(describe_countdown),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.stop_tx.lock().await.is_some()
    }

    /// Starts the background tick loop. Refuses if already running or if
    /// no schedule is configured, as `start()` does.
    pub async fn start(self: &Arc<Self>, callback: ScheduledCallback) -> bool {
        if self.is_running().await {
            tracing::warn!("scheduler already running");
            return false;
        }
        if self.state.lock().await.current.is_none() {
            tracing::error!("cannot start scheduler without a schedule");
            return false;
        }

        let (tx, mut rx) = watch::channel(false);
        *self.stop_tx.lock().await = Some(tx);

        let this = Arc::clone(self);
        let join = tokio::spawn(async move {
            loop {
                let next_run = this.state.lock().await.next_run;
                let Some(next_run) = next_run else {
                    if wait_or_stop(&mut rx, std::time::Duration::from_secs(1)).await {
                        break;
                    }
                    continue;
                };

                let now = Utc::now();
                if now >= next_run {
                    tracing::info!(%now, "executing scheduled run");
                    (callback)().await;
                    let mut state = this.state.lock().await;
                    state.next_run = state.current.as_ref().and_then(calculate_next_run);
                } else {
                    let sleep_for = (next_run - now).to_std().unwrap_or(std::time::Duration::from_secs(1));
                    let capped = sleep_for.min(std::time::Duration::from_secs(1));
                    if wait_or_stop(&mut rx, capped).await {
                        break;
                    }
                }
            }
        });
        *self.handle.lock().await = Some(join);
        true
    }

    pub async fn stop(&self) -> bool {
        let tx = self.stop_tx.lock().await.take();
        let Some(tx) = tx else {
            return true;
        };
        let _ = tx.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        true
    }
}

/// Waits for either `duration` to elapse or a stop signal, returning
/// `true` if a stop was signalled.
async fn wait_or_stop(rx: &mut watch::Receiver<bool>, duration: std::time::Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        result = rx.changed() => result.is_ok() && *rx.borrow(),
    }
}

fn validate(kind: &ScheduleKind) -> Result<()> {
    match kind {
        ScheduleKind::Cron(expr) => Cron::new(expr)
            .parse()
            .map(|_| ())
            .map_err(|e| Error::Config(format!("invalid cron expression '{expr}': {e}"))),
        ScheduleKind::IntervalMinutes(n) => {
            if *n > 0 {
                Ok(())
            } else {
                Err(Error::Config(format!("interval must be positive, got {n}")))
            }
        }
    }
}

fn calculate_next_run(kind: &ScheduleKind) -> Option<DateTime<Utc>> {
    match kind {
        ScheduleKind::Cron(expr) => Cron::new(expr).parse().ok().and_then(|cron| cron.find_next_occurrence(&Utc::now(), false).ok()),
        ScheduleKind::IntervalMinutes(n) => Some(Utc::now() + chrono::Duration::minutes(*n)),
    }
}

fn parse_schedule(kind: &str, value: &serde_yaml::Value) -> Option<ScheduleKind> {
    match kind {
        "cron" => value.as_str().map(|s| ScheduleKind::Cron(s.to_string())),
        "interval" => value.as_i64().map(ScheduleKind::IntervalMinutes),
        _ => None,
    }
}

fn describe(kind: &ScheduleKind) -> String {
    match kind {
        ScheduleKind::Cron(expr) => expr.clone(),
        ScheduleKind::IntervalMinutes(n) => n.to_string(),
    }
}

/// "N minutes until next run at TIMESTAMP", clamped to 0 once `next_run`
/// has already passed rather than printing a negative countdown.
fn describe_countdown(next_run: DateTime<Utc>) -> String {
    let minutes = (next_run - Utc::now()).num_minutes().max(0);
    format!("{minutes} minutes until next run at {}", next_run.format("%Y-%m-%d %H:%M:%S UTC"))
}
