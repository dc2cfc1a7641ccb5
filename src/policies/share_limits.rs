//! Evaluator 6: share limits (§4.5 item 6, §4.5.1 minimum-unmet semantics).
//!
//! Grounded in `share_limits.py`: `assign_torrents_to_group()` (first
//! matching group by priority order wins, mirroring the tracker
//! resolver's first-match-wins shape), `update_share_limits_for_group()`
//! (apply ratio/seeding-time/last-active limits, tag the group, throttle
//! or pause on reached limits), `has_reached_seed_limit()`'s nested
//! minimum checks (sticky tag-until-met semantics), and
//! `cleanup_torrents_for_group()` (recycle torrents that reached their
//! limit when `cleanup` is set).

use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;

use crate::client::TorrentClient;
use crate::config::{Settings, ShareLimitGroup};
use crate::error::Result;
use crate::inventory::Inventory;
use crate::model::{Limit, Torrent};
use crate::recycle::{ManifestFields, RecycleBin};

use super::EvaluatorStats;

const MIN_SEEDING_TIME_TAG: &str = "min_seeding_time_not_reached";
const MIN_NUM_SEEDS_TAG: &str = "min_num_seeds_not_reached";
const MIN_LAST_ACTIVE_TAG: &str = "min_last_active_not_reached";

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn tag_matches(torrent: &Torrent, group: &ShareLimitGroup) -> bool {
    if !group.include_all_tags.is_empty() && !group.include_all_tags.iter().all(|t| torrent.tags.contains(t)) {
        return false;
    }
    if !group.include_any_tags.is_empty() && !group.include_any_tags.iter().any(|t| torrent.tags.contains(t)) {
        return false;
    }
    if group.exclude_all_tags.iter().all(|t| torrent.tags.contains(t)) && !group.exclude_all_tags.is_empty() {
        return false;
    }
    if group.exclude_any_tags.iter().any(|t| torrent.tags.contains(t)) {
        return false;
    }
    true
}

fn category_matches(torrent: &Torrent, group: &ShareLimitGroup) -> bool {
    group.categories.is_empty() || group.categories.contains(&torrent.category)
}

fn size_matches(torrent: &Torrent, group: &ShareLimitGroup) -> bool {
    if let Some(min) = group.min_torrent_size {
        if torrent.size_bytes < min {
            return false;
        }
    }
    if let Some(max) = group.max_torrent_size {
        if torrent.size_bytes > max {
            return false;
        }
    }
    true
}

/// Finds the first group (by priority, ties broken by declaration order)
/// whose predicates all match `torrent`.
fn assign_group<'a>(
    torrent: &Torrent,
    ordered_groups: &'a [(&'a String, &'a ShareLimitGroup)],
) -> Option<(&'a String, &'a ShareLimitGroup)> {
    ordered_groups
        .iter()
        .find(|(_, group)| tag_matches(torrent, group) && category_matches(torrent, group) && size_matches(torrent, group))
        .map(|(name, group)| (*name, *group))
}

struct MinimumUnmet {
    seeding_time: bool,
    num_seeds: bool,
    last_active: bool,
}

impl MinimumUnmet {
    fn any(&self) -> bool {
        self.seeding_time || self.num_seeds || self.last_active
    }
}

fn check_minimums(torrent: &Torrent, group: &ShareLimitGroup) -> MinimumUnmet {
    let seeding_minutes = torrent.seeding_time_seconds / 60;
    let inactive_minutes = (now_unix() - torrent.last_activity_unix).max(0) / 60;
    MinimumUnmet {
        seeding_time: group.min_seeding_time > 0 && seeding_minutes < group.min_seeding_time,
        num_seeds: group.min_num_seeds > 0 && torrent.num_complete < group.min_num_seeds,
        last_active: group.min_last_active > 0 && inactive_minutes < group.min_last_active,
    }
}

/// Whether `torrent` has reached a configured maximum (ratio, seeding
/// time, or last-active) under `global` for any `Global`-sentinel limits.
fn reached_max_limit(
    torrent: &Torrent,
    group: &ShareLimitGroup,
    global_ratio_enabled: bool,
    global_ratio: f64,
) -> bool {
    let ratio_limit: Limit = group.max_ratio.into();
    let ratio_reached = match ratio_limit {
        Limit::Unlimited => false,
        Limit::Value(n) => torrent.ratio >= n as f64,
        Limit::Global => global_ratio_enabled && torrent.ratio >= global_ratio,
    };

    let seed_limit: Limit = group.max_seeding_time.into();
    let seeding_minutes = torrent.seeding_time_seconds / 60;
    let seed_reached = match seed_limit {
        Limit::Unlimited => false,
        Limit::Value(n) => seeding_minutes >= n,
        Limit::Global => false,
    };

    let inactive_minutes = (now_unix() - torrent.last_activity_unix).max(0) / 60;
    let last_active_limit: Limit = group.max_last_active.into();
    let last_active_reached = matches!(last_active_limit, Limit::Value(n) if inactive_minutes >= n);

    ratio_reached || seed_reached || last_active_reached
}

#[allow(clippy::too_many_arguments)]
pub async fn evaluate(
    client: &dyn TorrentClient,
    recycle_bin: &RecycleBin,
    inventory: &Inventory,
    groups: &IndexMap<String, ShareLimitGroup>,
    settings: &Settings,
    global_ratio_enabled: bool,
    global_ratio: f64,
    dry_run: bool,
) -> Result<EvaluatorStats> {
    let mut stats = EvaluatorStats::default();

    let mut ordered: Vec<(&String, &ShareLimitGroup)> = groups.iter().collect();
    ordered.sort_by_key(|(_, g)| g.priority);

    let candidates: Vec<&Torrent> = inventory
        .all
        .iter()
        .filter(|t| !settings.share_limits_filter_completed || t.is_complete())
        .collect();

    // Assign every candidate to its group up front so `enable_group_upload_speed`
    // can divide the group's configured speed by its actual member count
    // (`group_config["limit_upload_speed"] = round(group_upload_speed / len(torrents))`
    // in the original `share_limits.py`) instead of applying the raw aggregate
    // cap to each member.
    let mut group_counts: IndexMap<&str, u32> = IndexMap::new();
    let assignments: Vec<Option<(&String, &ShareLimitGroup)>> = candidates
        .iter()
        .map(|t| {
            let assigned = assign_group(*t, &ordered);
            if let Some((name, _)) = assigned {
                *group_counts.entry(name.as_str()).or_insert(0) += 1;
            }
            assigned
        })
        .collect();

    for (torrent, assignment) in candidates.into_iter().zip(assignments) {
        let Some((name, group)) = assignment else {
            continue;
        };

        let unmet = check_minimums(torrent, group);
        let group_tag = group.custom_tag.clone().unwrap_or_else(|| name.clone());

        if unmet.any() {
            for (flag, tag) in [
                (unmet.seeding_time, MIN_SEEDING_TIME_TAG),
                (unmet.num_seeds, MIN_NUM_SEEDS_TAG),
                (unmet.last_active, MIN_LAST_ACTIVE_TAG),
            ] {
                if flag && !torrent.tags.contains(tag) {
                    stats.record_planned();
                    if !dry_run {
                        if let Err(e) = client.add_tags(&torrent.hash, std::slice::from_ref(&tag.to_string())).await {
                            stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                            continue;
                        }
                    }
                    stats.record_applied();
                }
            }
            if torrent.ratio_limit != Limit::Unlimited || torrent.seeding_time_limit_minutes != Limit::Unlimited {
                stats.record_planned();
                if !dry_run {
                    if let Err(e) = client.set_share_limits(&torrent.hash, -1.0, -1, -1).await {
                        stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                        continue;
                    }
                }
                stats.record_applied();
            }
            continue;
        }

        for tag in [MIN_SEEDING_TIME_TAG, MIN_NUM_SEEDS_TAG, MIN_LAST_ACTIVE_TAG] {
            if torrent.tags.contains(tag) {
                stats.record_planned();
                if !dry_run {
                    if let Err(e) = client.remove_tags(&torrent.hash, std::slice::from_ref(&tag.to_string())).await {
                        stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                        continue;
                    }
                    if group.reset_upload_speed_on_unmet_minimums {
                        let _ = client.set_upload_limit(&torrent.hash, -1).await;
                    }
                }
                stats.record_applied();
            }
        }

        if group.add_group_to_tag && !torrent.tags.contains(&group_tag) {
            stats.record_planned();
            if !dry_run {
                if let Err(e) = client.add_tags(&torrent.hash, std::slice::from_ref(&group_tag)).await {
                    stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                    continue;
                }
            }
            stats.record_applied();
        }

        if group.enable_group_upload_speed {
            let member_count = group_counts.get(name.as_str()).copied().unwrap_or(1).max(1);
            let effective_speed = (group.limit_upload_speed as f64 / member_count as f64).round() as i64;
            stats.record_planned();
            if !dry_run {
                if let Err(e) = client.set_upload_limit(&torrent.hash, effective_speed).await {
                    stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                    continue;
                }
            }
            stats.record_applied();
        }

        let seed_time_minutes = group.max_seeding_time;
        let inactive_minutes = group.max_last_active;
        stats.record_planned();
        if !dry_run {
            if let Err(e) = client
                .set_share_limits(&torrent.hash, group.max_ratio as f64, seed_time_minutes, inactive_minutes)
                .await
            {
                stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                continue;
            }
        }
        stats.record_applied();

        if reached_max_limit(torrent, group, global_ratio_enabled, global_ratio) {
            if group.cleanup {
                stats.record_planned();
                if !dry_run {
                    let fields = ManifestFields {
                        category: torrent.category.clone(),
                        files: torrent.files.iter().map(|f| f.name.clone()).collect(),
                        ..Default::default()
                    };
                    if let Err(e) = recycle_bin.recycle(client, torrent, true, fields).await {
                        stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                        continue;
                    }
                }
                stats.record_applied();
            } else if let Some(throttle) = group.upload_speed_on_limit_reached {
                stats.record_planned();
                if !dry_run {
                    if let Err(e) = client.set_upload_limit(&torrent.hash, throttle).await {
                        stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                        continue;
                    }
                    // Keep the client from re-pausing the torrent once the throttle
                    // is the only thing enforcing the limit.
                    if let Err(e) = client.set_share_limits(&torrent.hash, -1.0, -1, -1).await {
                        stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                        continue;
                    }
                }
                stats.record_applied();
            } else {
                stats.record_planned();
                if !dry_run {
                    if let Err(e) = client.pause(&torrent.hash).await {
                        stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                        continue;
                    }
                }
                stats.record_applied();
            }
        } else if group.resume_torrent_after_change && torrent.state.is_paused() {
            stats.record_planned();
            if !dry_run {
                if let Err(e) = client.resume(&torrent.hash).await {
                    stats.record_error(&torrent.hash, &torrent.name, e.to_string());
                    continue;
                }
            }
            stats.record_applied();
        }
    }

    Ok(stats)
}
