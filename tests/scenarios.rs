//! Cross-module integration scenarios. Each test builds the pieces an
//! evaluator needs by hand (a `FakeClient`, an `Inventory`, and whatever
//! config fragment the evaluator consults) rather than going through
//! `orchestrator::run_for_config`, so a scenario exercises exactly the
//! collaboration it names instead of an entire config-file round trip.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tempfile::TempDir;

use qbt_reconcile::client::fake::FakeClient;
use qbt_reconcile::config::{NoHardLinksCategory, Settings, ShareLimitGroup};
use qbt_reconcile::fs::PathTranslator;
use qbt_reconcile::inventory::Inventory;
use qbt_reconcile::model::{Limit, NameAggregate, Torrent, TorrentFile, TorrentState, TrackerEntry, TrackerStatus};
use qbt_reconcile::policies::tracker_error::{self, NoopProbe};
use qbt_reconcile::policies::{cross_seed, nohardlinks, orphans, share_limits};
use qbt_reconcile::recycle::RecycleBin;
use qbt_reconcile::scheduler::{ScheduleKind, Scheduler};

fn base_torrent(hash: &str, name: &str) -> Torrent {
    Torrent {
        hash: hash.to_string(),
        name: name.to_string(),
        category: "movies".to_string(),
        tags: HashSet::new(),
        save_path: "/data/movies".to_string(),
        content_path: "/data/movies/x".to_string(),
        trackers: vec![],
        state: TorrentState::Other,
        progress: 1.0,
        ratio: 0.0,
        seeding_time_seconds: 0,
        last_activity_unix: 0,
        size_bytes: 1_000,
        upload_limit_bytes_per_sec: -1,
        ratio_limit: Limit::Global,
        seeding_time_limit_minutes: Limit::Global,
        num_complete: 1,
        files: Vec::<TorrentFile>::new(),
        auto_tmm: true,
        added_on: 0,
    }
}

fn recycle_bin_disabled() -> RecycleBin {
    RecycleBin {
        enabled: false,
        recycle_root: "/tmp/unused".into(),
        split_by_category: false,
        save_torrents: false,
    }
}

fn minimal_torrent_bytes() -> Vec<u8> {
    b"d4:infod6:lengthi10e4:name4:test12:piece lengthi16384eee".to_vec()
}

/// Scenario 1: a file dropped into the cross-seed directory whose parsed
/// name matches a complete torrent already in the client is admitted,
/// moved out of the drop directory, and the client receives an
/// `add_torrent` call.
#[tokio::test]
async fn cross_seed_admission_adds_torrent_and_clears_drop_dir() {
    let drop_dir = TempDir::new().unwrap();
    let added_dir = TempDir::new().unwrap();
    let error_dir = TempDir::new().unwrap();

    let dropped = drop_dir.path().join("[siteid][tracker.example]Movie.2020.torrent");
    tokio::fs::write(&dropped, minimal_torrent_bytes()).await.unwrap();

    let existing = base_torrent("a", "Movie.2020");
    let client = FakeClient::new(vec![existing.clone()]);

    let mut inventory = Inventory::default();
    let mut agg = NameAggregate::default();
    agg.push(existing);
    inventory.by_name.insert("Movie.2020".to_string(), agg);

    let stats = cross_seed::evaluate(&client, drop_dir.path(), added_dir.path(), error_dir.path(), &inventory, false)
        .await
        .unwrap();

    assert_eq!(stats.applied, 1);
    assert!(!dropped.exists());
    assert!(added_dir
        .path()
        .join("[siteid][tracker.example]Movie.2020.torrent")
        .exists());
    let calls = client.calls.lock().await;
    assert!(calls.iter().any(|c| c.op == "add_torrent"));
}

/// Scenario 2: a torrent every tracker reports as unregistered is removed,
/// but with `delete_contents = false` because a cross-seeded sibling with
/// the same name still has a healthy (not-contacted) tracker entry.
#[tokio::test]
async fn unregistered_torrent_with_healthy_sibling_keeps_its_files() {
    let mut rejected = base_torrent("a", "Show");
    rejected.trackers = vec![TrackerEntry {
        url: "http://tracker.example/announce".to_string(),
        status: TrackerStatus::NotWorking,
        msg: "torrent not found".to_string(),
    }];

    let mut sibling = base_torrent("b", "Show");
    sibling.trackers = vec![TrackerEntry {
        url: "http://tracker.example/announce".to_string(),
        status: TrackerStatus::NotContacted,
        msg: String::new(),
    }];

    let client = FakeClient::new(vec![rejected.clone(), sibling.clone()]);

    let mut inventory = Inventory::default();
    inventory.issue.push(rejected.clone());
    let mut agg = NameAggregate::default();
    agg.push(rejected);
    agg.push(sibling);
    inventory.by_name.insert("Show".to_string(), agg);

    let bin = recycle_bin_disabled();
    let stats = tracker_error::evaluate(
        &client,
        &bin,
        &inventory,
        &NoopProbe,
        &Settings::default(),
        false,
        true,
        false,
    )
    .await
    .unwrap();

    assert_eq!(stats.applied, 1);
    let torrents = client.torrents.lock().await;
    assert!(!torrents.contains_key("a"), "the unregistered copy should be gone");
    assert!(torrents.contains_key("b"), "the healthy sibling must survive untouched");
    let calls = client.calls.lock().await;
    let delete_call = calls.iter().find(|c| c.op == "delete_torrent").unwrap();
    assert_eq!(delete_call.hash, "a");
}

/// Scenario 3: a torrent that has reached its group's ratio limit is
/// tagged and throttled to the group's configured upload speed rather
/// than deleted, since `cleanup` is left off for this group.
#[tokio::test]
async fn share_limit_reached_throttles_instead_of_deleting() {
    let mut t = base_torrent("a", "Show");
    t.ratio = 5.0;

    let client = FakeClient::new(vec![t.clone()]);
    let mut inventory = Inventory::default();
    inventory.all.push(t);

    let mut groups: IndexMap<String, ShareLimitGroup> = IndexMap::new();
    groups.insert(
        "movies".to_string(),
        ShareLimitGroup {
            priority: 0,
            include_all_tags: vec![],
            include_any_tags: vec![],
            exclude_all_tags: vec![],
            exclude_any_tags: vec![],
            categories: vec!["movies".to_string()],
            min_torrent_size: None,
            max_torrent_size: None,
            max_ratio: 1,
            max_seeding_time: -2,
            max_last_active: -1,
            min_seeding_time: 0,
            min_num_seeds: 0,
            min_last_active: 0,
            limit_upload_speed: -1,
            cleanup: false,
            resume_torrent_after_change: false,
            add_group_to_tag: true,
            custom_tag: None,
            enable_group_upload_speed: true,
            reset_upload_speed_on_unmet_minimums: false,
            upload_speed_on_limit_reached: Some(100),
        },
    );

    let bin = recycle_bin_disabled();
    let stats = share_limits::evaluate(&client, &bin, &inventory, &groups, &Settings::default(), true, 2.0, false)
        .await
        .unwrap();

    assert!(stats.applied >= 1);
    let torrents = client.torrents.lock().await;
    let surviving = torrents.get("a").expect("throttled, not deleted");
    assert_eq!(surviving.upload_limit_bytes_per_sec, 100);
}

/// Scenario 4: a torrent with no hardlinks gets tagged on one run, then
/// untagged on a later run once a hardlink reappears under its content
/// path — the self-heal `tag_nohardlinks.py` performs across successive
/// passes against the same client state.
#[tokio::test]
async fn nohardlinks_toggle_across_two_runs() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("movie.mkv");
    tokio::fs::write(&file, b"data").await.unwrap();

    let mut t = base_torrent("a", "Show");
    t.content_path = dir.path().to_str().unwrap().to_string();
    let client = FakeClient::new(vec![t.clone()]);

    let mut categories = HashMap::new();
    categories.insert("movies".to_string(), NoHardLinksCategory::default());

    let inventory = {
        let mut inv = Inventory::default();
        inv.all.push(t.clone());
        inv
    };
    let first = nohardlinks::evaluate(&client, &inventory, &categories, &Settings::default(), false)
        .await
        .unwrap();
    assert_eq!(first.applied, 1);
    {
        let torrents = client.torrents.lock().await;
        assert!(torrents.get("a").unwrap().tags.contains("noHL"));
    }

    let link = dir.path().join("movie.mkv.hardlink");
    std::fs::hard_link(&file, &link).unwrap();

    let tagged = {
        let torrents = client.torrents.lock().await;
        torrents.get("a").unwrap().clone()
    };
    let inventory = {
        let mut inv = Inventory::default();
        inv.all.push(tagged);
        inv
    };
    let second = nohardlinks::evaluate(&client, &inventory, &categories, &Settings::default(), false)
        .await
        .unwrap();
    assert_eq!(second.applied, 1);
    let torrents = client.torrents.lock().await;
    assert!(!torrents.get("a").unwrap().tags.contains("noHL"));
}

/// Scenario 5: a root directory with more orphaned files than the
/// configured threshold refuses the entire sweep rather than deleting a
/// partial, surprising subset.
#[tokio::test]
async fn orphan_sweep_above_threshold_deletes_nothing() {
    let root = TempDir::new().unwrap();
    let orphaned_dir = TempDir::new().unwrap();
    tokio::fs::write(root.path().join("a.mkv"), b"x").await.unwrap();
    tokio::fs::write(root.path().join("b.mkv"), b"x").await.unwrap();
    tokio::fs::write(root.path().join("c.mkv"), b"x").await.unwrap();

    let inventory = Inventory::default();
    let result = orphans::evaluate(
        root.path(),
        orphaned_dir.path(),
        &[],
        1,
        7,
        &inventory,
        &PathTranslator::identity(),
        false,
    )
    .await;

    assert!(result.is_err());
    for name in ["a.mkv", "b.mkv", "c.mkv"] {
        assert!(root.path().join(name).exists(), "{name} must survive a refused sweep");
    }
}

/// Scenario 6: a schedule saved by one `Scheduler` instance is picked
/// back up, unchanged, by a freshly constructed instance over the same
/// directory — the persistence a process restart relies on.
#[tokio::test]
async fn scheduler_persists_across_simulated_restart() {
    let dir = TempDir::new().unwrap();
    let before_restart = Scheduler::new(dir.path(), false).await;
    before_restart
        .save_schedule(ScheduleKind::Cron("0 */6 * * *".to_string()))
        .await
        .unwrap();

    let after_restart = Scheduler::new(dir.path(), false).await;
    let status = after_restart.get_status().await;
    assert_eq!(status.current, Some(ScheduleKind::Cron("0 */6 * * *".to_string())));
    assert!(status.next_run.is_some());
}
