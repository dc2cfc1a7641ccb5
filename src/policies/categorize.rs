//! Evaluator 2: categorization (§4.5 item 2).
//!
//! Grounded in `category.py`: a 409 conflict on `set_category` triggers
//! `create_category` at the torrent's *current* save path, then a retry;
//! `force_auto_tmm` (subject to `force_auto_tmm_ignore_tags`) flips
//! auto-management alongside the category update, not only at inventory
//! build time.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::client::TorrentClient;
use crate::config::{Settings, TrackerProfile};
use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::trackers;

use super::EvaluatorStats;

const UNCATEGORIZED: &str = "Uncategorized";

fn basename(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}

pub async fn evaluate(
    client: &dyn TorrentClient,
    inventory: &Inventory,
    tracker_config: &mut IndexMap<String, TrackerProfile>,
    cat: &IndexMap<String, String>,
    cat_change: &HashMap<String, String>,
    settings: &Settings,
    dry_run: bool,
) -> Result<EvaluatorStats> {
    let mut stats = EvaluatorStats::default();

    for torrent in &inventory.all {
        if !settings.cat_update_all && !torrent.category.is_empty() {
            continue;
        }
        if !torrent.auto_tmm && !torrent.category.is_empty() {
            continue;
        }

        let profile = trackers::resolve(tracker_config, torrent);
        let candidate = profile
            .category
            .or_else(|| cat.get(&torrent.save_path).cloned())
            .unwrap_or_else(|| basename(&torrent.save_path));

        if candidate == UNCATEGORIZED || candidate == torrent.category {
            continue;
        }

        stats.record_planned();
        if dry_run {
            stats.record_applied();
            continue;
        }

        match client.set_category(&torrent.hash, &candidate).await {
            Ok(()) => stats.record_applied(),
            Err(Error::ClientConflict(_)) => {
                if let Err(e) = client.create_category(&candidate, &torrent.save_path).await {
                    stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                    continue;
                }
                if let Err(e) = client.set_category(&torrent.hash, &candidate).await {
                    stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                    continue;
                }
                stats.record_applied();
            }
            Err(e) => {
                stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                continue;
            }
        }

        if settings.force_auto_tmm
            && !torrent
                .tags
                .iter()
                .any(|t| settings.force_auto_tmm_ignore_tags.contains(t))
        {
            if let Err(e) = client.set_auto_management(&torrent.hash, true).await {
                stats.record_error(&torrent.hash, &torrent.name, e.to_string());
            }
        }
    }

    for torrent in &inventory.all {
        if let Some(new_cat) = cat_change.get(&torrent.category) {
            if new_cat == &torrent.category {
                continue;
            }
            stats.record_planned();
            if dry_run {
                stats.record_applied();
                continue;
            }
            if let Err(e) = client.set_category(&torrent.hash, new_cat).await {
                stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                continue;
            }
            stats.record_applied();
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;
    use crate::model::{Limit, Torrent, TorrentFile, TorrentState};
    use std::collections::HashSet;

    fn torrent(hash: &str, save_path: &str, category: &str) -> Torrent {
        Torrent {
            hash: hash.to_string(),
            name: "Show".to_string(),
            category: category.to_string(),
            tags: HashSet::new(),
            save_path: save_path.to_string(),
            content_path: format!("{save_path}/x"),
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
            files: Vec::<TorrentFile>::new(),
            auto_tmm: true,
            added_on: 0,
        }
    }

    fn inventory_of(torrents: Vec<Torrent>) -> Inventory {
        let mut inv = Inventory::default();
        inv.all = torrents;
        inv
    }

    #[tokio::test]
    async fn falls_back_to_save_path_basename() {
        let t = torrent("a", "/data/movies", "");
        let client = FakeClient::new(vec![t.clone()]);
        let inventory = inventory_of(vec![t]);
        let mut trackers = IndexMap::new();
        let cat = IndexMap::new();
        let cat_change = HashMap::new();
        let stats = evaluate(
            &client,
            &inventory,
            &mut trackers,
            &cat,
            &cat_change,
            &Settings::default(),
            false,
        )
        .await
        .unwrap();
        assert_eq!(stats.applied, 1);
        let torrents = client.torrents.lock().await;
        assert_eq!(torrents.get("a").unwrap().category, "movies");
    }

    #[tokio::test]
    async fn configured_save_path_mapping_wins_over_basename() {
        let t = torrent("a", "/data/movies", "");
        let client = FakeClient::new(vec![t.clone()]);
        let inventory = inventory_of(vec![t]);
        let mut trackers = IndexMap::new();
        let mut cat = IndexMap::new();
        cat.insert("/data/movies".to_string(), "films".to_string());
        let cat_change = HashMap::new();
        let stats = evaluate(
            &client,
            &inventory,
            &mut trackers,
            &cat,
            &cat_change,
            &Settings::default(),
            false,
        )
        .await
        .unwrap();
        assert_eq!(stats.applied, 1);
        let torrents = client.torrents.lock().await;
        assert_eq!(torrents.get("a").unwrap().category, "films");
    }

    #[tokio::test]
    async fn already_categorized_torrent_is_skipped_without_cat_update_all() {
        let t = torrent("a", "/data/movies", "movies");
        let client = FakeClient::new(vec![t.clone()]);
        let inventory = inventory_of(vec![t]);
        let mut trackers = IndexMap::new();
        let cat = IndexMap::new();
        let cat_change = HashMap::new();
        let stats = evaluate(
            &client,
            &inventory,
            &mut trackers,
            &cat,
            &cat_change,
            &Settings::default(),
            false,
        )
        .await
        .unwrap();
        assert_eq!(stats.planned, 0);
    }

    #[tokio::test]
    async fn cat_change_pass_remaps_renamed_category() {
        let t = torrent("a", "/data/movies", "old-movies");
        let client = FakeClient::new(vec![t.clone()]);
        let inventory = inventory_of(vec![t]);
        let mut trackers = IndexMap::new();
        let cat = IndexMap::new();
        let mut cat_change = HashMap::new();
        cat_change.insert("old-movies".to_string(), "movies".to_string());
        let mut settings = Settings::default();
        settings.cat_update_all = false;
        let stats = evaluate(&client, &inventory, &mut trackers, &cat, &cat_change, &settings, false)
            .await
            .unwrap();
        assert_eq!(stats.applied, 1);
        let torrents = client.torrents.lock().await;
        assert_eq!(torrents.get("a").unwrap().category, "movies");
    }
}
