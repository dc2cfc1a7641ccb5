//! Inventory builder (§4.3): fetches torrents, indexes them by name, and
//! classifies each as *valid*, *issue*, or neither based on tracker-status
//! aggregation.

use std::collections::HashMap;

use tracing::debug;

use crate::client::{TorrentClient, TorrentFilter};
use crate::config::Settings;
use crate::error::Result;
use crate::model::{NameAggregate, Torrent, TrackerStatus};

#[derive(Debug, Default)]
pub struct Inventory {
    pub by_name: HashMap<String, NameAggregate>,
    pub issue: Vec<Torrent>,
    pub valid: Vec<Torrent>,
    pub all: Vec<Torrent>,
}

/// Messages that indicate a non-working tracker is merely down, not an
/// actual problem with the torrent. Torrents whose only non-working
/// tracker messages match this list are left unclassified rather than
/// flagged as an issue.
fn is_down_like(msg: &str) -> bool {
    let lowered = msg.to_lowercase();
    ["not working", "timed out", "connection refused", "could not connect"]
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Builds the inventory. `dry_run` gates the `set_auto_management` side
/// effect triggered by `force_auto_tmm`; the counter still reflects the
/// planned mutation either way.
pub async fn build(
    client: &dyn TorrentClient,
    settings: &Settings,
    dry_run: bool,
) -> Result<Inventory> {
    let mut torrents = client.list_torrents(TorrentFilter::default()).await?;
    torrents.sort_by_key(|t| t.added_on);

    let mut inventory = Inventory::default();

    for torrent in torrents {
        if settings.force_auto_tmm
            && !torrent.auto_tmm
            && !torrent.category.is_empty()
            && !torrent
                .tags
                .iter()
                .any(|t| settings.force_auto_tmm_ignore_tags.contains(t))
        {
            debug!(hash = %torrent.hash, "force_auto_tmm: requesting auto management");
            if !dry_run {
                client.set_auto_management(&torrent.hash, true).await?;
            }
        }

        let any_working = torrent.trackers.iter().any(|t| t.status.is_working());
        let any_problem = torrent
            .trackers
            .iter()
            .any(|t| !t.status.is_working() && !is_down_like(&t.msg) && t.status != TrackerStatus::Disabled);

        if any_working {
            inventory.valid.push(torrent.clone());
        } else if any_problem {
            inventory.issue.push(torrent.clone());
        }

        inventory
            .by_name
            .entry(torrent.name.clone())
            .or_default()
            .push(torrent.clone());
        inventory.all.push(torrent);
    }

    Ok(inventory)
}
