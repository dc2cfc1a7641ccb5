//! Evaluator 8: orphaned-data detection (§4.5 item 8).
//!
//! Grounded in `remove_orphaned.py`: the root directory's files and every
//! torrent's content files are both collected (the parallel
//! `ThreadPoolExecutor(max_workers=max(cpu*2,4))` fetch this crate's
//! cooperative-async `fs::walk` stands in for), `orphaned = root_files -
//! torrent_files`, exclude globs are matched against the on-disk path,
//! `max_orphaned_files_to_delete` refuses the whole sweep rather than
//! deleting a partial, surprising subset, and `empty_after_x_days == 0`
//! deletes immediately instead of staging through the orphaned-data
//! directory for the reaper to collect later.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use glob::Pattern;

use crate::error::{Error, Result};
use crate::fs::{delete, move_file, normalize_windows_drive_path, remove_empty_dirs, walk, PathTranslator};
use crate::inventory::Inventory;

use super::EvaluatorStats;

/// Every file path a torrent in `inventory` claims to own, translated
/// into this engine's (remote) view of the filesystem.
///
/// `file.name` as reported by the client is already relative to
/// `save_path` (and, for a multi-file torrent, includes the torrent's own
/// root folder) — joining against `content_path` instead would double up
/// that folder and never match a real file. See `get_full_path_of_torrent_files`
/// in the original `remove_orphaned.py`, which joins against `save_path`.
fn torrent_owned_files(inventory: &Inventory, translator: &PathTranslator) -> HashSet<PathBuf> {
    let mut owned = HashSet::new();
    for torrent in &inventory.all {
        let save_root = normalize_windows_drive_path(&translator.to_remote(&torrent.save_path));
        if torrent.files.is_empty() {
            let content_root = normalize_windows_drive_path(&translator.to_remote(&torrent.content_path));
            owned.insert(PathBuf::from(content_root));
            continue;
        }
        for file in &torrent.files {
            let full = normalize_windows_drive_path(&format!("{}/{}", save_root, file.name));
            owned.insert(PathBuf::from(full));
        }
    }
    owned
}

#[allow(clippy::too_many_arguments)]
pub async fn evaluate(
    root_dir: &Path,
    orphaned_dir: &Path,
    recycle_dir: &Path,
    exclude_patterns: &[String],
    max_orphaned_files_to_delete: i64,
    empty_after_x_days: i64,
    inventory: &Inventory,
    translator: &PathTranslator,
    dry_run: bool,
) -> Result<EvaluatorStats> {
    let mut stats = EvaluatorStats::default();

    // Skip the orphaned-staging and recycle-bin directories themselves, or
    // every previously staged/recycled orphan is re-detected and re-staged
    // on each run (`get_root_files(root_dir, remote_dir, orphaned_dir)` in
    // the original excludes the staging dir for the same reason).
    let skip_dirs = vec![orphaned_dir.to_path_buf(), recycle_dir.to_path_buf()];
    let root_files = walk(root_dir, &skip_dirs).await?;
    let owned = torrent_owned_files(inventory, translator);
    let patterns: Vec<Pattern> = exclude_patterns.iter().filter_map(|p| Pattern::new(p).ok()).collect();

    let mut orphaned: Vec<PathBuf> = root_files
        .into_iter()
        .filter(|f| !owned.contains(f))
        .filter(|f| !patterns.iter().any(|p| p.matches_path(f)))
        .collect();
    orphaned.sort();

    if max_orphaned_files_to_delete >= 0 && orphaned.len() as i64 > max_orphaned_files_to_delete {
        return Err(Error::ThresholdExceeded(format!(
            "{} orphaned files exceeds the configured maximum of {}",
            orphaned.len(),
            max_orphaned_files_to_delete
        )));
    }

    for file in &orphaned {
        stats.record_planned();
        if dry_run {
            stats.record_applied();
            continue;
        }

        let result = if empty_after_x_days == 0 {
            delete(file).await
        } else {
            let relative = file.strip_prefix(root_dir).unwrap_or(file);
            let dest = orphaned_dir.join(relative);
            move_file(file, &dest, true).await
        };

        match result {
            Ok(()) => stats.record_applied(),
            Err(e) => stats.record_error("", &file.display().to_string(), e.to_string()),
        }
    }

    if !dry_run && !orphaned.is_empty() {
        remove_empty_dirs(root_dir, &[], exclude_patterns.to_vec().as_ref()).await?;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Limit, Torrent, TorrentFile, TorrentState};
    use std::collections::HashSet as StdHashSet;
    use tempfile::TempDir;

    fn torrent(content_path: &str, files: Vec<TorrentFile>) -> Torrent {
        Torrent {
            hash: "a".to_string(),
            name: "Show".to_string(),
            category: String::new(),
            tags: StdHashSet::new(),
            save_path: content_path.to_string(),
            content_path: content_path.to_string(),
            trackers: vec![],
            state: TorrentState::Other,
            progress: 1.0,
            ratio: 0.0,
            seeding_time_seconds: 0,
            last_activity_unix: 0,
            size_bytes: 0,
            upload_limit_bytes_per_sec: -1,
            ratio_limit: Limit::Global,
            seeding_time_limit_minutes: Limit::Global,
            num_complete: 0,
            files,
            auto_tmm: true,
            added_on: 0,
        }
    }

    #[tokio::test]
    async fn detects_and_moves_orphaned_file() {
        let root = TempDir::new().unwrap();
        let orphaned_dir = TempDir::new().unwrap();
        tokio::fs::write(root.path().join("keep.mkv"), b"x").await.unwrap();
        tokio::fs::write(root.path().join("orphan.mkv"), b"x").await.unwrap();

        let mut inventory = Inventory::default();
        inventory.all.push(torrent(
            root.path().to_str().unwrap(),
            vec![TorrentFile {
                name: "keep.mkv".to_string(),
                size: 1,
            }],
        ));

        let recycle_dir = TempDir::new().unwrap();
        let stats = evaluate(
            root.path(),
            orphaned_dir.path(),
            recycle_dir.path(),
            &[],
            -1,
            7,
            &inventory,
            &PathTranslator::identity(),
            false,
        )
        .await
        .unwrap();

        assert_eq!(stats.applied, 1);
        assert!(orphaned_dir.path().join("orphan.mkv").exists());
        assert!(root.path().join("keep.mkv").exists());
        assert!(!root.path().join("orphan.mkv").exists());
    }

    #[tokio::test]
    async fn refuses_sweep_above_threshold() {
        let root = TempDir::new().unwrap();
        let orphaned_dir = TempDir::new().unwrap();
        tokio::fs::write(root.path().join("a.mkv"), b"x").await.unwrap();
        tokio::fs::write(root.path().join("b.mkv"), b"x").await.unwrap();

        let inventory = Inventory::default();
        let recycle_dir = TempDir::new().unwrap();
        let result = evaluate(
            root.path(),
            orphaned_dir.path(),
            recycle_dir.path(),
            &[],
            1,
            7,
            &inventory,
            &PathTranslator::identity(),
            false,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_after_zero_days_deletes_immediately() {
        let root = TempDir::new().unwrap();
        let orphaned_dir = TempDir::new().unwrap();
        tokio::fs::write(root.path().join("orphan.mkv"), b"x").await.unwrap();

        let inventory = Inventory::default();
        let recycle_dir = TempDir::new().unwrap();
        let stats = evaluate(
            root.path(),
            orphaned_dir.path(),
            recycle_dir.path(),
            &[],
            -1,
            0,
            &inventory,
            &PathTranslator::identity(),
            false,
        )
        .await
        .unwrap();
        assert_eq!(stats.applied, 1);
        assert!(!root.path().join("orphan.mkv").exists());
        assert!(!orphaned_dir.path().join("orphan.mkv").exists());
    }
}
