//! Evaluator 1: recheck/resume (§4.5 item 1).

use crate::client::{GlobalShareLimits, TorrentClient};
use crate::error::Result;
use crate::inventory::Inventory;
use crate::model::{Limit, Torrent};

use super::EvaluatorStats;

/// Whether `torrent`'s ratio is constrained, and if so, whether it is
/// currently below the limit. `None` means this dimension imposes no
/// constraint (unlimited, or a global limit that is disabled).
fn ratio_below_limit(torrent: &Torrent, global: &GlobalShareLimits) -> Option<bool> {
    match torrent.ratio_limit {
        Limit::Unlimited => None,
        Limit::Value(n) => Some(torrent.ratio < n as f64),
        Limit::Global => {
            if global.ratio_enabled {
                Some(torrent.ratio < global.ratio)
            } else {
                None
            }
        }
    }
}

fn seeding_time_below_limit(torrent: &Torrent, global: &GlobalShareLimits) -> Option<bool> {
    let minutes = torrent.seeding_time_seconds / 60;
    match torrent.seeding_time_limit_minutes {
        Limit::Unlimited => None,
        Limit::Value(n) => Some(minutes < n),
        Limit::Global => {
            if global.seed_time_enabled {
                Some(minutes < global.seed_time_minutes)
            } else {
                None
            }
        }
    }
}

fn should_resume(torrent: &Torrent, global: &GlobalShareLimits) -> bool {
    let ratio = ratio_below_limit(torrent, global);
    let seed_time = seeding_time_below_limit(torrent, global);
    let no_constraint = ratio.is_none() && seed_time.is_none();
    no_constraint || ratio == Some(true) || seed_time == Some(true)
}

pub async fn evaluate(
    client: &dyn TorrentClient,
    inventory: &Inventory,
    global_limits: GlobalShareLimits,
    dry_run: bool,
) -> Result<EvaluatorStats> {
    let mut stats = EvaluatorStats::default();
    let mut paused: Vec<&Torrent> = inventory.all.iter().filter(|t| t.state.is_paused()).collect();
    paused.sort_by_key(|t| t.size_bytes);

    for torrent in paused {
        if torrent.is_complete() {
            if should_resume(torrent, &global_limits) {
                stats.record_planned();
                if !dry_run {
                    if let Err(e) = client.resume(&torrent.hash).await {
                        stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                        continue;
                    }
                }
                stats.record_applied();
            }
        } else if torrent.progress == 0.0 && !torrent.state.is_checking() {
            let other_complete = inventory
                .by_name
                .get(&torrent.name)
                .map(|agg| agg.entries.iter().any(|e| e.hash != torrent.hash && e.is_complete()))
                .unwrap_or(false);
            if other_complete {
                stats.record_planned();
                if !dry_run {
                    if let Err(e) = client.recheck(&torrent.hash).await {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;
    use crate::config::Settings;
    use crate::model::{TorrentFile, TorrentState, TrackerEntry, TrackerStatus};
    use std::collections::HashSet;

    fn base_torrent(hash: &str, name: &str) -> Torrent {
        Torrent {
            hash: hash.to_string(),
            name: name.to_string(),
            category: String::new(),
            tags: HashSet::new(),
            save_path: "/data".to_string(),
            content_path: "/data/x".to_string(),
            trackers: vec![TrackerEntry {
                url: "http://tracker.example/announce".to_string(),
                status: TrackerStatus::Working,
                msg: String::new(),
            }],
            state: TorrentState::PausedUp,
            progress: 1.0,
            ratio: 0.0,
            seeding_time_seconds: 0,
            last_activity_unix: 0,
            size_bytes: 100,
            upload_limit_bytes_per_sec: -1,
            ratio_limit: Limit::Unlimited,
            seeding_time_limit_minutes: Limit::Unlimited,
            num_complete: 0,
            files: Vec::<TorrentFile>::new(),
            auto_tmm: true,
            added_on: 0,
        }
    }

    fn no_global() -> GlobalShareLimits {
        GlobalShareLimits {
            ratio_enabled: false,
            ratio: -1.0,
            seed_time_enabled: false,
            seed_time_minutes: -1,
        }
    }

    #[tokio::test]
    async fn resumes_complete_torrent_with_no_constraint() {
        let t = base_torrent("a", "Show");
        let client = FakeClient::new(vec![t.clone()]);
        let inventory = crate::inventory::build(&client, &Settings::default(), false)
            .await
            .unwrap();
        let stats = evaluate(&client, &inventory, no_global(), false).await.unwrap();
        assert_eq!(stats.applied, 1);
        let calls = client.calls.lock().await;
        assert!(calls.iter().any(|c| c.op == "resume" && c.hash == "a"));
    }

    #[tokio::test]
    async fn does_not_resume_when_over_literal_ratio_limit() {
        let mut t = base_torrent("a", "Show");
        t.ratio_limit = Limit::Value(2);
        t.ratio = 3.0;
        t.seeding_time_limit_minutes = Limit::Value(100);
        t.seeding_time_seconds = 60 * 200;
        let client = FakeClient::new(vec![t.clone()]);
        let inventory = crate::inventory::build(&client, &Settings::default(), false)
            .await
            .unwrap();
        let stats = evaluate(&client, &inventory, no_global(), false).await.unwrap();
        assert_eq!(stats.applied, 0);
    }

    #[tokio::test]
    async fn rechecks_empty_instance_when_sibling_complete() {
        let mut complete = base_torrent("a", "Show");
        complete.state = TorrentState::Other;
        let mut empty = base_torrent("b", "Show");
        empty.progress = 0.0;
        empty.state = TorrentState::PausedDl;
        let client = FakeClient::new(vec![complete, empty]);
        let inventory = crate::inventory::build(&client, &Settings::default(), false)
            .await
            .unwrap();
        let stats = evaluate(&client, &inventory, no_global(), false).await.unwrap();
        let calls = client.calls.lock().await;
        assert!(calls.iter().any(|c| c.op == "recheck" && c.hash == "b"));
        assert_eq!(stats.applied, 1);
    }

    #[tokio::test]
    async fn dry_run_still_counts_planned_mutation() {
        let t = base_torrent("a", "Show");
        let client = FakeClient::new(vec![t]);
        let inventory = crate::inventory::build(&client, &Settings::default(), false)
            .await
            .unwrap();
        let stats = evaluate(&client, &inventory, no_global(), true).await.unwrap();
        assert_eq!(stats.planned, 1);
        assert_eq!(stats.applied, 0);
        let calls = client.calls.lock().await;
        assert!(calls.is_empty());
    }
}
