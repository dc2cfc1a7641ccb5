//! Evaluator 3: tagging (§4.5 item 3).

use indexmap::IndexMap;

use crate::client::TorrentClient;
use crate::config::{Settings, TrackerProfile};
use crate::error::Result;
use crate::inventory::Inventory;
use crate::model::TorrentState;
use crate::trackers;

use super::EvaluatorStats;

const DEFAULT_STALLED_TAG: &str = "stalled";

pub async fn evaluate(
    client: &dyn TorrentClient,
    inventory: &Inventory,
    tracker_config: &mut IndexMap<String, TrackerProfile>,
    settings: &Settings,
    dry_run: bool,
) -> Result<EvaluatorStats> {
    let mut stats = EvaluatorStats::default();
    let stalled_tag = settings.stalled_tag.clone().unwrap_or_else(|| DEFAULT_STALLED_TAG.to_string());

    for torrent in &inventory.all {
        let profile = trackers::resolve(tracker_config, torrent);
        let missing: Vec<String> = profile
            .tag
            .iter()
            .filter(|t| !torrent.tags.contains(*t))
            .cloned()
            .collect();

        if torrent.tags.is_empty() || !missing.is_empty() {
            if !missing.is_empty() {
                stats.record_planned();
                if !dry_run {
                    if let Err(e) = client.add_tags(&torrent.hash, &missing).await {
                        stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                        continue;
                    }
                }
                stats.record_applied();
            }
        }

        if settings.tag_stalled_torrents {
            let has_stalled_tag = torrent.tags.contains(&stalled_tag);
            let is_stalled = torrent.state == TorrentState::StalledDl;
            if is_stalled && !has_stalled_tag {
                stats.record_planned();
                if !dry_run {
                    if let Err(e) = client.add_tags(&torrent.hash, std::slice::from_ref(&stalled_tag)).await {
                        stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                        continue;
                    }
                }
                stats.record_applied();
            } else if !is_stalled && has_stalled_tag {
                stats.record_planned();
                if !dry_run {
                    if let Err(e) = client
                        .remove_tags(&torrent.hash, std::slice::from_ref(&stalled_tag))
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
