//! Evaluator 4: tracker-error tagging and unregistered-torrent removal
//! (§4.5 item 4).
//!
//! Grounded in `remove_unregistered.py`: `remove_previous_errors()` untags
//! torrents that have healed, `process_torrent_issues()` walks each
//! tracker's status/message pair to decide `unregistered_everywhere` and
//! `no_trackers_working`, and `del_unregistered()` picks `delete_files`
//! based on whether a cross-seeded sibling is still healthy.

use async_trait::async_trait;

use crate::client::TorrentClient;
use crate::config::Settings;
use crate::error::Result;
use crate::inventory::Inventory;
use crate::model::{Torrent, TrackerStatus};
use crate::recycle::{ManifestFields, RecycleBin};

use super::EvaluatorStats;

/// Strategy hook for the "unregistered everywhere" tie-break (§9 design
/// note): the source consults an external API for one specific tracker
/// host when substring matching alone is ambiguous. Rather than hard-code
/// that host into the evaluator, the decision is delegated to whatever
/// probe the caller wires in; `NoopProbe` (the default) always defers to
/// substring classification.
#[async_trait]
pub trait UnregisteredProbe: Send + Sync {
    /// Returns `Some(true)`/`Some(false)` to override the substring-based
    /// verdict for `torrent`, or `None` to defer to it.
    async fn check(&self, torrent: &Torrent) -> Option<bool>;
}

/// Default probe: no external host is configured, so every torrent defers
/// to substring classification.
pub struct NoopProbe;

#[async_trait]
impl UnregisteredProbe for NoopProbe {
    async fn check(&self, _torrent: &Torrent) -> Option<bool> {
        None
    }
}

/// Substrings (case-insensitive) a tracker message carries when the
/// torrent itself has been rejected, as opposed to the tracker merely
/// being unreachable.
const UNREGISTERED_MSGS: &[&str] = &[
    "unregistered torrent",
    "torrent not registered",
    "not registered with this tracker",
    "torrent not found",
    "unknown torrent",
    "uploaded",
    "infohash not found",
    "not exist",
];

/// Substrings that override an `UNREGISTERED_MSGS` match: the tracker is
/// reporting a transient condition of its own, not a torrent-level
/// rejection.
const IGNORE_MSGS: &[&str] = &["maintenance", "under maintenance", "in progress"];

fn is_unregistered_msg(msg: &str) -> bool {
    let lowered = msg.to_lowercase();
    if IGNORE_MSGS.iter().any(|p| lowered.contains(p)) {
        return false;
    }
    UNREGISTERED_MSGS.iter().any(|p| lowered.contains(p))
}

/// Whether every non-disabled tracker on `torrent` is rejecting it as
/// unregistered, and whether none of its trackers are currently working.
fn classify_issue(torrent: &Torrent) -> (bool, bool) {
    let relevant: Vec<_> = torrent
        .trackers
        .iter()
        .filter(|t| t.status != TrackerStatus::Disabled)
        .collect();
    if relevant.is_empty() {
        return (false, true);
    }
    let no_trackers_working = relevant.iter().all(|t| !t.status.is_working());
    let unregistered_everywhere = relevant
        .iter()
        .all(|t| !t.status.is_working() && is_unregistered_msg(&t.msg));
    (unregistered_everywhere, no_trackers_working)
}

/// A cross-seeded sibling counts as healthy if any of its trackers has an
/// empty message or is simply not yet contacted (`del_unregistered`'s `""
/// in t_msg or 2 in t_status` check).
fn has_healthy_sibling(inventory: &Inventory, torrent: &Torrent) -> bool {
    inventory
        .by_name
        .get(&torrent.name)
        .map(|agg| {
            agg.entries.iter().any(|other| {
                other.hash != torrent.hash
                    && other
                        .trackers
                        .iter()
                        .any(|t| t.msg.is_empty() || t.status == TrackerStatus::NotContacted)
            })
        })
        .unwrap_or(false)
}

#[allow(clippy::too_many_arguments)]
pub async fn evaluate(
    client: &dyn TorrentClient,
    recycle_bin: &RecycleBin,
    inventory: &Inventory,
    probe: &dyn UnregisteredProbe,
    settings: &Settings,
    tag_tracker_error: bool,
    rem_unregistered: bool,
    dry_run: bool,
) -> Result<EvaluatorStats> {
    let mut stats = EvaluatorStats::default();
    let error_tag = settings.tracker_error_tag.as_str();

    if tag_tracker_error {
        for torrent in &inventory.valid {
            if torrent.tags.contains(error_tag) {
                stats.record_planned();
                if !dry_run {
                    if let Err(e) = client
                        .remove_tags(&torrent.hash, std::slice::from_ref(&error_tag.to_string()))
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

    for torrent in &inventory.issue {
        let (substring_verdict, no_trackers_working) = classify_issue(torrent);
        // `unregistered_everywhere` only matters when removal is enabled at all
        // (the original seeds its loop variable from `cfg_rem_unregistered` before
        // ever consulting tracker messages), so the probe/substring verdict is
        // gated by the `rem_unregistered` flag rather than evaluated unconditionally.
        let unregistered_everywhere = rem_unregistered && probe.check(torrent).await.unwrap_or(substring_verdict);

        // Mutually exclusive, matching the original's `if unregistered_everywhere:
        // del_unregistered(...) elif no_trackers_working: tag_tracker_error(...)` —
        // a torrent unregistered everywhere is deleted, never also tagged.
        if unregistered_everywhere {
            let delete_contents = !has_healthy_sibling(inventory, torrent);
            stats.record_planned();
            if !dry_run {
                let fields = ManifestFields {
                    category: torrent.category.clone(),
                    files: torrent.files.iter().map(|f| f.name.clone()).collect(),
                    ..Default::default()
                };
                if let Err(e) = recycle_bin.recycle(client, torrent, delete_contents, fields).await {
                    stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                    continue;
                }
            }
            stats.record_applied();
        } else if tag_tracker_error && no_trackers_working && !torrent.tags.contains(error_tag) {
            stats.record_planned();
            if !dry_run {
                if let Err(e) = client.add_tags(&torrent.hash, std::slice::from_ref(&error_tag.to_string())).await {
                    stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                    continue;
                }
            }
            stats.record_applied();
        }
    }

    Ok(stats)
}
