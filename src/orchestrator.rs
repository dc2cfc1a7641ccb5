//! Orchestrator (§4.9 / §9): the per-configuration-file run driver. Loads a
//! configuration, connects the client adapter, builds the inventory
//! snapshot, invokes the policy evaluators in the fixed order of §4.5, and
//! aggregates stats into a single run report. Single-flight and the
//! configuration glob fan-out live one layer up, in the `Engine` that owns
//! this module (§9 "a single `Engine` value that owns them").

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::cli::Cli;
use crate::client::{QbitClient, TorrentClient};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fs::PathTranslator;
use crate::inventory;
use crate::notify::NotificationFanout;
use crate::policies::{categorize, cross_seed, nohardlinks, orphans, recheck, share_limits, tags, tracker_error, EvaluatorStats};
use crate::recycle::{self, ReapLocation, RecycleBin};

/// The oldest qBittorrent Web API version this engine has been validated
/// against. `--skip-qb-version-check` bypasses this entirely.
const MIN_SUPPORTED_VERSION: &str = "v4.3.0";

/// Outcome of a single configuration file's run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub config_path: PathBuf,
    pub stats: EvaluatorStats,
    pub run_time_seconds: f64,
}

/// Runs every enabled evaluator once against the configuration at
/// `config_path`, in the fixed order (recheck → categorize → tag →
/// tracker-error/unregistered → no-hardlinks → share-limits → cross-seed →
/// orphans → recycle-reaper). Returns a report on success; a *Config
/// invalid* or a run-fatal client error propagates so the caller can move on
/// to the next configuration file without touching this one's report.
pub async fn run_for_config(config_path: &Path, cli: &Cli) -> Result<RunReport> {
    let started = Instant::now();
    let mut config = Config::load_from(config_path)?;

    let client = QbitClient::new(config.qbt.host.clone(), config.qbt.user.clone(), config.qbt.pass.clone());

    let fanout = NotificationFanout::new(
        config.webhooks.clone(),
        config.notifiarr.clone(),
        config.apprise.clone(),
        config.bhd.clone(),
        config.qbt.host.clone(),
    );

    if !cli.skip_qb_version_check {
        if let Err(e) = check_version(&client).await {
            fanout.error(&e.to_string(), None, true).await;
            return Err(e);
        }
    }

    fanout.run_start(cli.dry_run).await;

    let result = run_evaluators(&client, &mut config, cli, &fanout).await;
    let run_time_seconds = started.elapsed().as_secs_f64();

    match &result {
        Ok(stats) => {
            let body = format!(
                "planned {}, applied {}, {} errors in {:.1}s",
                stats.planned,
                stats.applied,
                stats.errors.len(),
                run_time_seconds
            );
            fanout.run_end(body, run_time_seconds).await;
        }
        Err(e) => {
            fanout.error(&e.to_string(), None, true).await;
        }
    }

    // The tracker resolver (§4.4) synthesizes and persists default profiles
    // into `config.tracker` as it runs, so subsequent runs stay stable.
    if !cli.dry_run {
        if let Ok(dumped) = config.dump() {
            if let Err(e) = tokio::fs::write(config_path, dumped).await {
                tracing::warn!(path = %config_path.display(), "failed to persist configuration: {e}");
            }
        }
    }

    let stats = result?;
    Ok(RunReport {
        config_path: config_path.to_path_buf(),
        stats,
        run_time_seconds,
    })
}

async fn check_version(client: &dyn TorrentClient) -> Result<()> {
    let version = client.server_version().await?;
    if parse_version(&version) < parse_version(MIN_SUPPORTED_VERSION) {
        return Err(Error::ClientUnsupportedVersion(format!(
            "qBittorrent {version} is older than the minimum supported {MIN_SUPPORTED_VERSION}"
        )));
    }
    Ok(())
}

fn parse_version(raw: &str) -> (u32, u32, u32) {
    let trimmed = raw.trim().trim_start_matches('v');
    let mut parts = trimmed.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

/// Runs one evaluator's future, merging its stats into `total` on success.
/// A *threshold exceeded* error is logged and swallowed so the run
/// continues (§7); a run-fatal client error propagates; anything else is a
/// per-evaluator warning that also does not abort the run.
/// Prints the banner-style section header the source draws with a repeated
/// divider character before each evaluator's pass (§6 `--divider`/`--width`).
fn log_evaluator_banner(name: &str, cli: &Cli) {
    let rule: String = cli.divider.repeat(cli.width);
    tracing::info!("{rule}");
    tracing::info!("{name}");
    tracing::info!("{rule}");
}

async fn merge_evaluator<Fut>(name: &str, total: &mut EvaluatorStats, fanout: &NotificationFanout, cli: &Cli, fut: Fut) -> Result<()>
where
    Fut: Future<Output = Result<EvaluatorStats>>,
{
    log_evaluator_banner(name, cli);
    match fut.await {
        Ok(stats) => {
            total.merge(stats);
            Ok(())
        }
        Err(e) if e.is_fatal_for_run() => Err(e),
        Err(e @ Error::ThresholdExceeded(_)) => {
            fanout.error(&e.to_string(), Some(name), false).await;
            Ok(())
        }
        Err(e) => {
            tracing::warn!(evaluator = name, "{e}");
            fanout.error(&e.to_string(), Some(name), false).await;
            Ok(())
        }
    }
}

fn build_recycle_bin(config: &Config) -> RecycleBin {
    RecycleBin {
        enabled: config.recyclebin.enabled,
        recycle_root: PathBuf::from(config.directory.recycle_dir_resolved()),
        split_by_category: config.recyclebin.split_by_category,
        save_torrents: config.recyclebin.save_torrents,
        torrents_dir: config.directory.torrents_dir.as_ref().map(PathBuf::from),
    }
}

fn build_translator(config: &Config) -> PathTranslator {
    match &config.directory.remote_dir {
        Some(remote) if remote != &config.directory.root_dir => {
            PathTranslator::new(vec![(config.directory.root_dir.clone(), remote.clone())])
        }
        _ => PathTranslator::identity(),
    }
}

async fn run_evaluators(client: &dyn TorrentClient, config: &mut Config, cli: &Cli, fanout: &NotificationFanout) -> Result<EvaluatorStats> {
    let any_set = cli.any_evaluator_flag_set();
    let dry_run = cli.dry_run;

    let global_limits = client.get_global_share_limits().await?;
    let mut inventory = inventory::build(client, &config.settings, dry_run).await?;

    let mut total = EvaluatorStats::default();

    if cli.recheck || !any_set {
        merge_evaluator(
            "recheck",
            &mut total,
            fanout,
            cli,
            recheck::evaluate(client, &inventory, global_limits, dry_run),
        )
        .await?;
    }

    if cli.cat_update || !any_set {
        merge_evaluator(
            "cat_update",
            &mut total,
            fanout,
            cli,
            categorize::evaluate(
                client,
                &inventory,
                &mut config.tracker,
                &config.cat,
                &config.cat_change,
                &config.settings,
                dry_run,
            ),
        )
        .await?;
    }

    if cli.tag_update || !any_set {
        merge_evaluator(
            "tag_update",
            &mut total,
            fanout,
            cli,
            tags::evaluate(client, &inventory, &mut config.tracker, &config.settings, dry_run),
        )
        .await?;
    }

    if cli.tag_tracker_error || cli.rem_unregistered || !any_set {
        let recycle_bin = build_recycle_bin(config);
        merge_evaluator(
            "tag_tracker_error",
            &mut total,
            fanout,
            cli,
            tracker_error::evaluate(
                client,
                &recycle_bin,
                &inventory,
                &tracker_error::NoopProbe,
                &config.settings,
                cli.tag_tracker_error || !any_set,
                cli.rem_unregistered || !any_set,
                dry_run,
            ),
        )
        .await?;
    }

    if cli.tag_nohardlinks || !any_set {
        merge_evaluator(
            "tag_nohardlinks",
            &mut total,
            fanout,
            cli,
            nohardlinks::evaluate(client, &inventory, &config.nohardlinks, &config.settings, dry_run),
        )
        .await?;
    }

    if cli.share_limits || !any_set {
        let recycle_bin = build_recycle_bin(config);
        merge_evaluator(
            "share_limits",
            &mut total,
            fanout,
            cli,
            share_limits::evaluate(
                client,
                &recycle_bin,
                &inventory,
                &config.share_limits,
                &config.settings,
                global_limits.ratio_enabled,
                global_limits.ratio,
                dry_run,
            ),
        )
        .await?;
    }

    if cli.cross_seed || !any_set {
        if let Some(cross_seed_dir) = config.directory.cross_seed.clone() {
            let cross_seed_path = PathBuf::from(&cross_seed_dir);
            let added_dir = cross_seed_path.join("added");
            let error_dir = cross_seed_path.join("error");
            if !dry_run {
                let _ = tokio::fs::create_dir_all(&added_dir).await;
                let _ = tokio::fs::create_dir_all(&error_dir).await;
            }
            merge_evaluator(
                "cross_seed",
                &mut total,
                fanout,
                cli,
                cross_seed::evaluate(client, &cross_seed_path, &added_dir, &error_dir, &mut inventory, dry_run),
            )
            .await?;
        }
    }

    if cli.rem_orphaned || !any_set {
        let translator = build_translator(config);
        let root_dir = PathBuf::from(translator.to_remote(&config.directory.root_dir));
        let orphaned_dir = PathBuf::from(config.directory.orphaned_dir_resolved());
        let recycle_dir = PathBuf::from(config.directory.recycle_dir_resolved());
        if !dry_run {
            let _ = tokio::fs::create_dir_all(&orphaned_dir).await;
        }
        merge_evaluator(
            "rem_orphaned",
            &mut total,
            fanout,
            cli,
            orphans::evaluate(
                &root_dir,
                &orphaned_dir,
                &recycle_dir,
                &config.orphaned.exclude_patterns,
                config.orphaned.max_orphaned_files_to_delete,
                config.orphaned.empty_after_x_days,
                &inventory,
                &translator,
                dry_run,
            ),
        )
        .await?;
    }

    if !cli.skip_cleanup {
        run_cleanup_sweeps(config, fanout, dry_run).await;
    }

    Ok(total)
}

/// Enumerates the roots the reaper sweep should walk. When
/// `split_by_category` is set, categories are whatever subdirectories
/// already exist under the recycle root rather than whatever the
/// configuration currently declares — a renamed or removed category still
/// leaves its recycle subdirectory behind, and it is still reaped once it
/// ages out (§9 open question).
async fn recycle_roots(recycle_root: &Path, split_by_category: bool) -> Vec<PathBuf> {
    if !split_by_category {
        return vec![recycle_root.to_path_buf()];
    }
    let mut roots = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(recycle_root).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.map(|ft| ft.is_dir()).unwrap_or(false) {
                roots.push(entry.path());
            }
        }
    }
    if roots.is_empty() {
        roots.push(recycle_root.to_path_buf());
    }
    roots
}

/// Reaps the recycle bin and orphaned-data roots. Gated out entirely by
/// `--skip-cleanup`, which suppresses both sweeps without touching the
/// evaluators that feed them (§6).
async fn run_cleanup_sweeps(config: &Config, fanout: &NotificationFanout, dry_run: bool) {
    if dry_run {
        return;
    }

    let recycle_root = PathBuf::from(config.directory.recycle_dir_resolved());
    let roots = recycle_roots(&recycle_root, config.recyclebin.split_by_category).await;
    match recycle::reap(ReapLocation::RecycleBin, &roots, config.recyclebin.empty_after_x_days).await {
        Ok(stats) => tracing::info!(deleted = stats.num_deleted, bytes = stats.bytes_deleted, "recycle bin reaped"),
        Err(e) => fanout.error(&e.to_string(), Some("cleanup_dirs"), false).await,
    }

    let orphaned_root = PathBuf::from(config.directory.orphaned_dir_resolved());
    match recycle::reap(ReapLocation::Orphaned, &[orphaned_root], config.orphaned.empty_after_x_days).await {
        Ok(stats) => tracing::info!(deleted = stats.num_deleted, bytes = stats.bytes_deleted, "orphaned data reaped"),
        Err(e) => fanout.error(&e.to_string(), Some("cleanup_dirs"), false).await,
    }
}
