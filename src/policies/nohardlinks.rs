//! Evaluator 5: no-hardlinks tagging (§4.5 item 5).
//!
//! Grounded in `tag_nohardlinks.py`: `_process_torrent_for_nohardlinks()`
//! (exclude-tag skip, hardlink check, tag-on-miss) and
//! `check_previous_nohardlinks_tagged_torrents()` (self-heals by untagging
//! once hardlinks reappear).

use std::path::Path;

use tokio::fs;

use crate::client::TorrentClient;
use crate::config::{NoHardLinksCategory, Settings};
use crate::error::Result;
use crate::inventory::Inventory;
use crate::model::Torrent;

use super::EvaluatorStats;

/// Whether every file under `path` has no hardlinks (link count 1).
/// `ignore_root_dir` skips files sitting directly in `path` itself,
/// checking only nested files — for layouts where a root-level `.nfo` or
/// sample file is deliberately hardlinked but the media underneath isn't.
async fn has_no_hardlinks(path: &Path, ignore_root_dir: bool) -> Result<bool> {
    let metadata = match fs::metadata(path).await {
        Ok(m) => m,
        Err(_) => return Ok(false),
    };
    if metadata.is_file() {
        return Ok(nlink_of(&metadata) <= 1);
    }

    let mut stack = vec![(path.to_path_buf(), true)];
    while let Some((dir, is_root)) = stack.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => continue,
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                stack.push((entry.path(), false));
                continue;
            }
            if is_root && ignore_root_dir {
                continue;
            }
            let meta = entry.metadata().await?;
            if nlink_of(&meta) > 1 {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

#[cfg(unix)]
fn nlink_of(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.nlink()
}

#[cfg(not(unix))]
fn nlink_of(_metadata: &std::fs::Metadata) -> u64 {
    1
}

pub async fn evaluate(
    client: &dyn TorrentClient,
    inventory: &Inventory,
    categories: &std::collections::HashMap<String, NoHardLinksCategory>,
    settings: &Settings,
    dry_run: bool,
) -> Result<EvaluatorStats> {
    let mut stats = EvaluatorStats::default();
    let nohl_tag = settings.nohardlinks_tag.as_str();

    for (category, cfg) in categories {
        let in_category: Vec<&Torrent> = inventory
            .all
            .iter()
            .filter(|t| &t.category == category)
            .filter(|t| !settings.tag_nohardlinks_filter_completed || t.is_complete())
            .collect();

        if in_category.is_empty() {
            tracing::warn!(category, "no torrents found for configured nohardlinks category");
            continue;
        }

        for torrent in in_category {
            if torrent.tags.iter().any(|t| cfg.exclude_tags.contains(t)) {
                continue;
            }

            let has_nohardlinks = match has_no_hardlinks(Path::new(&torrent.content_path), cfg.ignore_root_dir).await {
                Ok(no_hardlinks) => no_hardlinks,
                Err(e) => {
                    stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                    continue;
                }
            };
            let is_tagged = torrent.tags.contains(nohl_tag);

            if has_nohardlinks && !is_tagged {
                stats.record_planned();
                if !dry_run {
                    if let Err(e) = client.add_tags(&torrent.hash, std::slice::from_ref(&nohl_tag.to_string())).await {
                        stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                        continue;
                    }
                }
                stats.record_applied();
            } else if !has_nohardlinks && is_tagged {
                stats.record_planned();
                if !dry_run {
                    if let Err(e) = client
                        .remove_tags(&torrent.hash, std::slice::from_ref(&nohl_tag.to_string()))
                        .await
                    {
                        stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                        continue;
                    }
                }
                stats.record_applied();
            }
        }
    }

    Ok(stats)
}
