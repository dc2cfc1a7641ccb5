//! Evaluator 7: cross-seed admission (§4.5 item 7).
//!
//! Grounded in `cross_seed.py`: torrent files dropped into the cross-seed
//! directory carry two `]`-delimited sections ahead of the name
//! (`file.split("]", 2)` in the source); the first section is discarded,
//! the second (minus its leading `[`) is the tracker label, and the tail
//! (minus `.torrent`) is the name used for the inventory lookup. A name
//! that substring-matches a complete torrent already in the client is
//! added paused under that torrent's save path and category, tagged
//! `cross-seed`, then moved out of the drop directory so it isn't
//! re-processed next run. A filename with fewer than two `]` separators
//! cannot be parsed this way (the source would raise an `IndexError`);
//! this is routed to the error directory instead of crashing the run.
//!
//! The info-hash computation walks the bencoded `.torrent` file by hand
//! (matching brackets/string-length prefixes) to slice out the `info`
//! dict rather than decoding the whole document, since only that span's
//! SHA-1 is needed (§6 wire formats).

use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use tokio::fs;

use crate::client::{TorrentClient, TorrentFilter};
use crate::error::Result;
use crate::fs::move_file;
use crate::inventory::Inventory;

use super::EvaluatorStats;

/// Parses the two-bracket-section filename grammar (§6), returning
/// `(tracker, name)`. A filename with fewer than two `]` separators, or
/// no `.torrent` tail after the second one, is left for the caller to
/// route to the error directory.
pub fn parse_filename(file_name: &str) -> Option<(String, String)> {
    let mut parts = file_name.splitn(3, ']');
    let _discarded = parts.next()?;
    let tracker_section = parts.next()?;
    let remainder = parts.next()?;

    let tracker = tracker_section.strip_prefix('[').unwrap_or(tracker_section).to_string();
    let name_end = remainder.find(".torrent")?;
    let name = &remainder[..name_end];
    if name.is_empty() {
        return None;
    }
    Some((tracker, name.to_string()))
}

fn bencode_string(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let colon = pos + data[pos..].iter().position(|&b| b == b':')?;
    let len: usize = std::str::from_utf8(&data[pos..colon]).ok()?.parse().ok()?;
    let start = colon + 1;
    let end = start.checked_add(len)?;
    if end > data.len() {
        return None;
    }
    Some((&data[start..end], end))
}

fn bencode_skip(data: &[u8], pos: usize) -> Option<usize> {
    match *data.get(pos)? {
        b'i' => {
            let e = pos + data[pos..].iter().position(|&b| b == b'e')?;
            Some(e + 1)
        }
        b'd' | b'l' => {
            let mut p = pos + 1;
            while data.get(p).copied() != Some(b'e') {
                p = bencode_skip(data, p)?;
            }
            Some(p + 1)
        }
        b'0'..=b'9' => bencode_string(data, pos).map(|(_, next)| next),
        _ => None,
    }
}

/// Slices out the bytes of the top-level `info` dict value.
fn info_dict_span(data: &[u8]) -> Option<(usize, usize)> {
    if data.first().copied() != Some(b'd') {
        return None;
    }
    let mut pos = 1;
    while data.get(pos).copied() != Some(b'e') {
        let (key, after_key) = bencode_string(data, pos)?;
        if key == b"info" {
            let value_end = bencode_skip(data, after_key)?;
            return Some((after_key, value_end));
        }
        pos = bencode_skip(data, after_key)?;
    }
    None
}

/// SHA-1 hex digest of the bencoded `info` dict, i.e. the torrent's
/// infohash.
pub fn info_hash(torrent_bytes: &[u8]) -> Option<String> {
    let (start, end) = info_dict_span(torrent_bytes)?;
    let mut hasher = Sha1::new();
    hasher.update(&torrent_bytes[start..end]);
    Some(hex::encode(hasher.finalize()))
}

pub async fn evaluate(
    client: &dyn TorrentClient,
    cross_seed_dir: &Path,
    added_dir: &Path,
    error_dir: &Path,
    inventory: &mut Inventory,
    dry_run: bool,
) -> Result<EvaluatorStats> {
    let mut stats = EvaluatorStats::default();

    let mut entries = match fs::read_dir(cross_seed_dir).await {
        Ok(e) => e,
        Err(_) => return Ok(stats),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await.map(|ft| ft.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }

    for file in files {
        let file_name = match file.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };

        let Some((_tracker, name)) = parse_filename(file_name) else {
            tracing::warn!(file = file_name, "cross-seed file does not match the expected naming grammar");
            if !dry_run {
                let dest = error_dir.join(file_name);
                let _ = move_file(&file, &dest, true).await;
            }
            continue;
        };

        let matched_name = inventory
            .by_name
            .iter()
            .find(|(existing, agg)| agg.is_complete && (existing.contains(&name) || name.contains(existing.as_str())))
            .map(|(existing, agg)| (existing.clone(), agg.entries.first().cloned()));

        let Some((matched_name, Some(reference))) = matched_name else {
            tracing::warn!(file = file_name, name = %name, "cross-seed file does not match any known torrent name");
            stats.record_error("", &name, "no matching torrent name in inventory".to_string());
            if !dry_run {
                let dest = error_dir.join(file_name);
                let _ = move_file(&file, &dest, true).await;
            }
            continue;
        };

        stats.record_planned();
        if dry_run {
            stats.record_applied();
            continue;
        }

        let bytes = match fs::read(&file).await {
            Ok(b) => b,
            Err(e) => {
                stats.record_error("", &name, e.to_string());
                continue;
            }
        };

        let computed_hash = info_hash(&bytes);

        if let Err(e) = client
            .add_torrent(
                bytes,
                &reference.save_path,
                &reference.category,
                &["cross-seed".to_string()],
                true,
            )
            .await
        {
            stats.record_error("", &name, e.to_string());
            continue;
        }

        let dest: PathBuf = added_dir.join(file_name);
        if let Err(e) = move_file(&file, &dest, true).await {
            stats.record_error("", &name, e.to_string());
            continue;
        }

        // If the client now reports this hash, append the new instance to
        // the in-memory aggregate so the second pass (and any evaluator
        // reading `inventory` later in this run) sees the cross-seed.
        if let Some(hash) = computed_hash {
            if let Ok(torrents) = client.list_torrents(TorrentFilter::default()).await {
                if let Some(new_instance) = torrents.into_iter().find(|t| t.hash == hash) {
                    inventory.by_name.entry(matched_name).or_default().push(new_instance);
                }
            }
        }

        stats.record_applied();
    }

    // Second pass: tag any torrent that arrived as a cross-seed by other
    // means than this drop directory - same name as another instance, not
    // the earliest-added copy, missing the tag.
    for agg in inventory.by_name.values() {
        if agg.count <= 1 {
            continue;
        }
        for entry in &agg.entries {
            if entry.hash == agg.first_hash || entry.tags.contains("cross-seed") {
                continue;
            }
            stats.record_planned();
            if !dry_run {
                if let Err(e) = client.add_tags(&entry.hash, &["cross-seed".to_string()]).await {
                    stats.record_error(&entry.hash, &entry.name, e.to_string());
                    continue;
                }
            }
            stats.record_applied();
        }
    }

    Ok(stats)
}
