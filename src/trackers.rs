//! Tracker resolver (§4.4): maps a torrent's tracker URLs to a configured
//! tracker profile by first-match-wins substring search, synthesizing and
//! persisting a default profile when nothing matches — mirroring
//! `config.py`'s `get_tags`/`get_category` persist-default behavior.

use indexmap::IndexMap;

use crate::config::TrackerProfile;
use crate::model::{host_of, Torrent};

/// A resolved profile merged from configuration, or synthesized from the
/// torrent's tracker host when no configured substring matched.
#[derive(Debug, Clone, Default)]
pub struct ResolvedProfile {
    pub tag: Vec<String>,
    pub category: Option<String>,
    pub max_ratio: Option<f64>,
    pub max_seeding_time: Option<i64>,
    pub min_seeding_time: Option<i64>,
    pub limit_upload_speed: Option<i64>,
    pub notifiarr: Option<String>,
    pub synthesized: bool,
}

impl From<&TrackerProfile> for ResolvedProfile {
    fn from(p: &TrackerProfile) -> Self {
        ResolvedProfile {
            tag: p.tag.clone(),
            category: p.category.clone(),
            max_ratio: p.max_ratio,
            max_seeding_time: p.max_seeding_time,
            min_seeding_time: p.min_seeding_time,
            limit_upload_speed: p.limit_upload_speed,
            notifiarr: p.notifiarr.clone(),
            synthesized: false,
        }
    }
}

/// Resolves a torrent's tracker profile against the configured map,
/// mutating `trackers` in place to persist a synthesized default so later
/// lookups (and a later `dump()`) remain stable (§4.4, §9).
pub fn resolve(trackers: &mut IndexMap<String, TrackerProfile>, torrent: &Torrent) -> ResolvedProfile {
    let urls: Vec<&str> = torrent.trackers.iter().map(|t| t.url.as_str()).collect();

    for (substring, profile) in trackers.iter() {
        if urls.iter().any(|url| url.contains(substring.as_str())) {
            return profile.into();
        }
    }

    let host = torrent
        .primary_tracker_host()
        .unwrap_or_else(|| urls.first().and_then(|u| host_of(u)).unwrap_or_default());

    let mut synthesized = TrackerProfile {
        tag: vec![host.clone()],
        ..Default::default()
    };
    trackers.insert(host.clone(), synthesized.clone());
    synthesized.tag = vec![host];

    ResolvedProfile {
        tag: synthesized.tag,
        category: None,
        max_ratio: None,
        max_seeding_time: None,
        min_seeding_time: None,
        limit_upload_speed: None,
        notifiarr: None,
        synthesized: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Limit, TorrentState, TrackerEntry, TrackerStatus};
    use std::collections::HashSet;

    fn torrent_with_tracker(url: &str) -> Torrent {
        Torrent {
            hash: "a".to_string(),
            name: "Show".to_string(),
            category: String::new(),
            tags: HashSet::new(),
            save_path: "/data".to_string(),
            content_path: "/data/x".to_string(),
            trackers: vec![TrackerEntry {
                url: url.to_string(),
                status: TrackerStatus::Working,
                msg: String::new(),
            }],
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
            files: vec![],
            auto_tmm: true,
            added_on: 0,
        }
    }

    #[test]
    fn first_configured_match_wins() {
        let mut trackers = IndexMap::new();
        trackers.insert(
            "tracker.example".to_string(),
            TrackerProfile {
                tag: vec!["first".to_string()],
                ..Default::default()
            },
        );
        trackers.insert(
            "example".to_string(),
            TrackerProfile {
                tag: vec!["second".to_string()],
                ..Default::default()
            },
        );
        let torrent = torrent_with_tracker("https://tracker.example/announce");
        let resolved = resolve(&mut trackers, &torrent);
        assert_eq!(resolved.tag, vec!["first".to_string()]);
        assert!(!resolved.synthesized);
    }

    #[test]
    fn unmatched_tracker_synthesizes_and_persists_default() {
        let mut trackers: IndexMap<String, TrackerProfile> = IndexMap::new();
        let torrent = torrent_with_tracker("https://unknown-tracker.example/announce");
        let resolved = resolve(&mut trackers, &torrent);
        assert!(resolved.synthesized);
        assert_eq!(resolved.tag, vec!["unknown-tracker.example".to_string()]);
        assert!(trackers.contains_key("unknown-tracker.example"));
    }
}
