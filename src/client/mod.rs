//! Client adapter: a thin, typed wrapper over the torrent-client API (§4.2),
//! behind a trait so evaluators depend on `TorrentClient`, not on
//! `qbit_rs::Qbit` directly — the same shape the teacher uses for its
//! `Mount` trait in front of concrete storage backends.

pub mod errors;

/// In-memory `TorrentClient` test double. Not `cfg(test)`-gated: the
/// `tests/` integration scenarios need it from outside this crate's own
/// test build, the same way a crate exposes a `testutils`-style module
/// unconditionally rather than duplicating the double per test binary.
pub mod fake;

use async_trait::async_trait;
use qbit_rs::model::{Credential, GetTorrentListArg, TorrentSource};
use qbit_rs::Qbit;

use crate::error::Result;
use crate::model::{Torrent, TorrentFile, TorrentState, TrackerEntry, TrackerStatus};

use self::errors::{classify_reqwest_error, with_retry, RetryPolicy};

/// Global share-limit settings as reported by the client, consulted when a
/// torrent's own limit is the `Global` sentinel.
#[derive(Debug, Clone, Copy)]
pub struct GlobalShareLimits {
    pub ratio_enabled: bool,
    pub ratio: f64,
    pub seed_time_enabled: bool,
    pub seed_time_minutes: i64,
}

/// Optional filter passed to `list_torrents`. Empty matches everything.
#[derive(Debug, Clone, Default)]
pub struct TorrentFilter {
    pub category: Option<String>,
    pub tag: Option<String>,
}

#[async_trait]
pub trait TorrentClient: Send + Sync {
    async fn list_torrents(&self, filter: TorrentFilter) -> Result<Vec<Torrent>>;
    async fn set_category(&self, hash: &str, category: &str) -> Result<()>;
    async fn create_category(&self, name: &str, save_path: &str) -> Result<()>;
    async fn add_tags(&self, hash: &str, tags: &[String]) -> Result<()>;
    async fn remove_tags(&self, hash: &str, tags: &[String]) -> Result<()>;
    async fn set_share_limits(
        &self,
        hash: &str,
        ratio: f64,
        seed_time_minutes: i64,
        inactive_seed_time_minutes: i64,
    ) -> Result<()>;
    async fn set_upload_limit(&self, hash: &str, bytes_per_sec: i64) -> Result<()>;
    async fn set_auto_management(&self, hash: &str, enabled: bool) -> Result<()>;
    async fn pause(&self, hash: &str) -> Result<()>;
    async fn resume(&self, hash: &str) -> Result<()>;
    async fn recheck(&self, hash: &str) -> Result<()>;
    async fn add_torrent(
        &self,
        file_bytes: Vec<u8>,
        save_path: &str,
        category: &str,
        tags: &[String],
        paused: bool,
    ) -> Result<()>;
    async fn delete_torrent(&self, hash: &str, delete_files: bool) -> Result<()>;
    async fn get_global_share_limits(&self) -> Result<GlobalShareLimits>;
    async fn ban_peers(&self, peers: &[String]) -> Result<()>;
    /// The client's reported application version, consulted by the
    /// orchestrator's startup version check (§4.2 "unsupported-version",
    /// `--skip-qb-version-check`).
    async fn server_version(&self) -> Result<String>;
}

/// Concrete `TorrentClient` backed by `qbit_rs::Qbit`.
pub struct QbitClient {
    inner: Qbit,
    retry_policy: RetryPolicy,
}

impl QbitClient {
    pub fn new(host: String, username: Option<String>, password: Option<String>) -> Self {
        let credential = Credential::new(username.unwrap_or_default(), password.unwrap_or_default());
        QbitClient {
            inner: Qbit::new(host.as_str(), credential),
            retry_policy: RetryPolicy::default(),
        }
    }

    async fn retrying<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, reqwest::Error>>,
    {
        with_retry(self.retry_policy, classify_reqwest_error, call).await
    }
}

fn map_state(raw: &str) -> TorrentState {
    match raw {
        "pausedUP" => TorrentState::PausedUp,
        "pausedDL" => TorrentState::PausedDl,
        "stalledDL" => TorrentState::StalledDl,
        "stalledUP" => TorrentState::StalledUp,
        "checkingDL" => TorrentState::CheckingDl,
        "checkingUP" => TorrentState::CheckingUp,
        "downloading" => TorrentState::Downloading,
        "uploading" => TorrentState::Uploading,
        "error" | "missingFiles" => TorrentState::Error,
        _ => TorrentState::Other,
    }
}

fn map_tracker_status(raw: i64) -> TrackerStatus {
    match raw {
        2 => TrackerStatus::NotContacted,
        3 => TrackerStatus::Working,
        4 => TrackerStatus::NotWorking,
        0 | 1 => TrackerStatus::Disabled,
        _ => TrackerStatus::Unknown,
    }
}

#[async_trait]
impl TorrentClient for QbitClient {
    async fn list_torrents(&self, filter: TorrentFilter) -> Result<Vec<Torrent>> {
        let arg = GetTorrentListArg {
            category: filter.category,
            tag: filter.tag,
            sort: Some("added_on".to_string()),
            ..Default::default()
        };
        let raw = self
            .retrying(|| self.inner.get_torrent_list(arg.clone()))
            .await?;

        let mut torrents = Vec::with_capacity(raw.len());
        for t in raw {
            let hash = t.hash.clone().unwrap_or_default();
            let trackers_raw = self
                .retrying(|| self.inner.get_torrent_trackers(&hash))
                .await
                .unwrap_or_default();
            let contents_raw = self
                .retrying(|| self.inner.get_torrent_contents(&hash, None))
                .await
                .unwrap_or_default();

            let trackers = trackers_raw
                .into_iter()
                .map(|tr| TrackerEntry {
                    url: tr.url.unwrap_or_default(),
                    status: map_tracker_status(tr.status.unwrap_or(0)),
                    msg: tr.msg.unwrap_or_default(),
                })
                .collect();

            let files = contents_raw
                .into_iter()
                .map(|f| TorrentFile {
                    name: f.name.unwrap_or_default(),
                    size: f.size.unwrap_or(0) as u64,
                })
                .collect();

            torrents.push(Torrent {
                hash: hash.clone(),
                name: t.name.unwrap_or_default(),
                category: t.category.unwrap_or_default(),
                tags: t
                    .tags
                    .unwrap_or_default()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                save_path: t.save_path.unwrap_or_default(),
                content_path: t.content_path.unwrap_or_default(),
                trackers,
                state: map_state(&t.state.map(|s| format!("{s:?}")).unwrap_or_default()),
                progress: t.progress.unwrap_or(0.0),
                ratio: t.ratio.unwrap_or(0.0),
                seeding_time_seconds: t.seeding_time.unwrap_or(0),
                last_activity_unix: t.last_activity.unwrap_or(0),
                size_bytes: t.size.unwrap_or(0) as u64,
                upload_limit_bytes_per_sec: t.up_limit.unwrap_or(-1),
                ratio_limit: t.ratio_limit.unwrap_or(-2.0).into(),
                seeding_time_limit_minutes: t.seeding_time_limit.unwrap_or(-2).into(),
                num_complete: t.num_complete.unwrap_or(0),
                files,
                auto_tmm: t.auto_tmm.unwrap_or(false),
                added_on: t.added_on.unwrap_or(0),
            });
        }
        Ok(torrents)
    }

    async fn set_category(&self, hash: &str, category: &str) -> Result<()> {
        self.retrying(|| {
            self.inner
                .set_torrent_category(vec![hash.to_string()], category)
        })
        .await
    }

    async fn create_category(&self, name: &str, save_path: &str) -> Result<()> {
        self.retrying(|| self.inner.add_category(name, save_path)).await
    }

    async fn add_tags(&self, hash: &str, tags: &[String]) -> Result<()> {
        self.retrying(|| self.inner.add_torrent_tags(vec![hash.to_string()], tags.to_vec()))
            .await
    }

    async fn remove_tags(&self, hash: &str, tags: &[String]) -> Result<()> {
        self.retrying(|| self.inner.remove_torrent_tags(vec![hash.to_string()], tags.to_vec()))
            .await
    }

    async fn set_share_limits(
        &self,
        hash: &str,
        ratio: f64,
        seed_time_minutes: i64,
        inactive_seed_time_minutes: i64,
    ) -> Result<()> {
        self.retrying(|| {
            self.inner.set_share_limits(
                vec![hash.to_string()],
                ratio,
                seed_time_minutes,
                inactive_seed_time_minutes,
            )
        })
        .await
    }

    async fn set_upload_limit(&self, hash: &str, bytes_per_sec: i64) -> Result<()> {
        self.retrying(|| self.inner.set_upload_limit(vec![hash.to_string()], bytes_per_sec))
            .await
    }

    async fn set_auto_management(&self, hash: &str, enabled: bool) -> Result<()> {
        self.retrying(|| self.inner.set_auto_management(vec![hash.to_string()], enabled))
            .await
    }

    async fn pause(&self, hash: &str) -> Result<()> {
        self.retrying(|| self.inner.pause_torrents(vec![hash.to_string()]))
            .await
    }

    async fn resume(&self, hash: &str) -> Result<()> {
        self.retrying(|| self.inner.resume_torrents(vec![hash.to_string()]))
            .await
    }

    async fn recheck(&self, hash: &str) -> Result<()> {
        self.retrying(|| self.inner.recheck_torrents(vec![hash.to_string()]))
            .await
    }

    async fn add_torrent(
        &self,
        file_bytes: Vec<u8>,
        save_path: &str,
        category: &str,
        tags: &[String],
        paused: bool,
    ) -> Result<()> {
        let source = TorrentSource::TorrentFiles {
            torrents: vec![file_bytes],
        };
        self.retrying(|| {
            self.inner.add_torrent_with_options(
                source.clone(),
                &qbit_rs::model::AddTorrentArg {
                    save_path: Some(save_path.to_string()),
                    category: Some(category.to_string()),
                    tags: Some(tags.join(",")),
                    paused: Some(if paused { "true" } else { "false" }.to_string()),
                    ..Default::default()
                },
            )
        })
        .await
    }

    async fn delete_torrent(&self, hash: &str, delete_files: bool) -> Result<()> {
        self.retrying(|| {
            self.inner
                .delete_torrents(vec![hash.to_string()], Some(delete_files))
        })
        .await
    }

    async fn get_global_share_limits(&self) -> Result<GlobalShareLimits> {
        let prefs = self.retrying(|| self.inner.get_application_preferences()).await?;
        Ok(GlobalShareLimits {
            ratio_enabled: prefs.max_ratio_enabled.unwrap_or(false),
            ratio: prefs.max_ratio.unwrap_or(-1.0),
            seed_time_enabled: prefs.max_seeding_time_enabled.unwrap_or(false),
            seed_time_minutes: prefs.max_seeding_time.unwrap_or(-1),
        })
    }

    async fn ban_peers(&self, peers: &[String]) -> Result<()> {
        self.retrying(|| self.inner.ban_peers(peers.to_vec())).await
    }

    async fn server_version(&self) -> Result<String> {
        self.retrying(|| self.inner.get_version()).await
    }
}
