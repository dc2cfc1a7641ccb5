//! Torrent snapshot types shared across the inventory builder, the tracker
//! resolver, and every policy evaluator.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A limit encoded with the client's sentinel convention: `-2` means "use
/// the client's global setting", `-1` means "no limit", and any
/// non-negative value is a literal. Evaluators compare against `Limit`
/// rather than the raw integer so the sentinel can never leak into a
/// numeric comparison by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Limit {
    Global,
    Unlimited,
    Value(i64),
}

impl From<i64> for Limit {
    fn from(raw: i64) -> Self {
        match raw {
            -2 => Limit::Global,
            n if n < 0 => Limit::Unlimited,
            n => Limit::Value(n),
        }
    }
}

impl From<Limit> for i64 {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Global => -2,
            Limit::Unlimited => -1,
            Limit::Value(n) => n,
        }
    }
}

impl Limit {
    /// `limit_upload_speed <= 0` is normalized to unlimited before any
    /// comparison (§8 boundary behavior).
    pub fn normalize_upload_speed(raw: i64) -> Limit {
        if raw <= 0 {
            Limit::Unlimited
        } else {
            Limit::Value(raw)
        }
    }
}

/// Working status of a single tracker as reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerStatus {
    Working,
    NotWorking,
    Disabled,
    NotContacted,
    Unknown,
}

impl TrackerStatus {
    pub fn is_working(self) -> bool {
        matches!(self, TrackerStatus::Working)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerEntry {
    pub url: String,
    pub status: TrackerStatus,
    pub msg: String,
}

/// Torrent state as surfaced by the client. Only the states the
/// evaluators actually branch on are named explicitly; everything else
/// collapses to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TorrentState {
    PausedUp,
    PausedDl,
    StalledDl,
    StalledUp,
    CheckingDl,
    CheckingUp,
    Downloading,
    Uploading,
    Error,
    Other,
}

impl TorrentState {
    pub fn is_paused(self) -> bool {
        matches!(self, TorrentState::PausedUp | TorrentState::PausedDl)
    }

    pub fn is_checking(self) -> bool {
        matches!(self, TorrentState::CheckingDl | TorrentState::CheckingUp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentFile {
    pub name: String,
    pub size: u64,
}

/// One row of the client's torrent list, translated into this engine's
/// vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Torrent {
    pub hash: String,
    pub name: String,
    pub category: String,
    pub tags: HashSet<String>,
    pub save_path: String,
    pub content_path: String,
    pub trackers: Vec<TrackerEntry>,
    pub state: TorrentState,
    pub progress: f64,
    pub ratio: f64,
    pub seeding_time_seconds: i64,
    pub last_activity_unix: i64,
    pub size_bytes: u64,
    pub upload_limit_bytes_per_sec: i64,
    pub ratio_limit: Limit,
    pub seeding_time_limit_minutes: Limit,
    pub num_complete: i64,
    pub files: Vec<TorrentFile>,
    pub auto_tmm: bool,
    pub added_on: i64,
}

impl Torrent {
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }

    /// The first tracker whose URL scheme is http/https/udp, truncated to
    /// its host, for display purposes (§4.4).
    pub fn primary_tracker_host(&self) -> Option<String> {
        self.trackers.iter().find_map(|t| host_of(&t.url))
    }
}

/// Extracts the host component of a URL without pulling in a full URL
/// parsing crate for a display-only truncation.
pub fn host_of(url: &str) -> Option<String> {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let host = without_scheme
        .split('/')
        .next()?
        .split('@')
        .next_back()?
        .split(':')
        .next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// All snapshot entries sharing a `name`, plus the derived facts the
/// cross-seed and unregistered-tracker evaluators rely on.
#[derive(Debug, Clone, Default)]
pub struct NameAggregate {
    pub entries: Vec<Torrent>,
    pub count: usize,
    pub msg: Vec<String>,
    pub status: Vec<TrackerStatus>,
    pub is_complete: bool,
    pub first_hash: String,
}

impl NameAggregate {
    pub fn push(&mut self, torrent: Torrent) {
        if self.entries.is_empty() {
            self.first_hash = torrent.hash.clone();
        }
        self.is_complete = self.is_complete || torrent.is_complete();
        for t in &torrent.trackers {
            self.msg.push(t.msg.clone());
            self.status.push(t.status);
        }
        self.count += 1;
        self.entries.push(torrent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_sentinel_round_trips() {
        assert_eq!(Limit::from(-2), Limit::Global);
        assert_eq!(Limit::from(-1), Limit::Unlimited);
        assert_eq!(Limit::from(-5), Limit::Unlimited);
        assert_eq!(Limit::from(0), Limit::Value(0));
        assert_eq!(Limit::from(42), Limit::Value(42));
        assert_eq!(i64::from(Limit::Global), -2);
        assert_eq!(i64::from(Limit::Unlimited), -1);
        assert_eq!(i64::from(Limit::Value(7)), 7);
    }

    #[test]
    fn upload_speed_non_positive_normalizes_to_unlimited() {
        assert_eq!(Limit::normalize_upload_speed(0), Limit::Unlimited);
        assert_eq!(Limit::normalize_upload_speed(-100), Limit::Unlimited);
        assert_eq!(Limit::normalize_upload_speed(512), Limit::Value(512));
    }

    #[test]
    fn host_of_strips_scheme_path_and_port() {
        assert_eq!(
            host_of("https://tracker.example.com:443/announce"),
            Some("tracker.example.com".to_string())
        );
        assert_eq!(
            host_of("udp://tracker.example.org:6969"),
            Some("tracker.example.org".to_string())
        );
    }

    #[test]
    fn name_aggregate_tracks_first_hash_and_completion() {
        let mut agg = NameAggregate::default();
        let mut t1 = sample_torrent("a", "Show");
        t1.progress = 0.5;
        agg.push(t1);
        let mut t2 = sample_torrent("b", "Show");
        t2.progress = 1.0;
        agg.push(t2);
        assert_eq!(agg.first_hash, "a");
        assert!(agg.is_complete);
        assert_eq!(agg.count, 2);
    }

    fn sample_torrent(hash: &str, name: &str) -> Torrent {
        Torrent {
            hash: hash.to_string(),
            name: name.to_string(),
            category: String::new(),
            tags: HashSet::new(),
            save_path: "/data".to_string(),
            content_path: "/data/x".to_string(),
            trackers: vec![],
            state: TorrentState::Other,
            progress: 0.0,
            ratio: 0.0,
            seeding_time_seconds: 0,
            last_activity_unix: 0,
            size_bytes: 0,
            upload_limit_bytes_per_sec: -1,
            ratio_limit: Limit::Global,
            seeding_time_limit_minutes: Limit::Global,
            num_complete: 0,
            files: vec![],
            auto_tmm: false,
            added_on: 0,
        }
    }
}
