//! In-memory `TorrentClient` double used by evaluator tests, the same way
//! the teacher exercises its storage layer against a `TempDir` instead of a
//! real backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::Torrent;

use super::{GlobalShareLimits, TorrentClient, TorrentFilter};

#[derive(Debug, Clone, Default)]
pub struct RecordedCall {
    pub op: String,
    pub hash: String,
}

pub struct FakeClient {
    pub torrents: Mutex<HashMap<String, Torrent>>,
    pub global_limits: GlobalShareLimits,
    pub calls: Mutex<Vec<RecordedCall>>,
    pub created_categories: Mutex<Vec<(String, String)>>,
}

impl FakeClient {
    pub fn new(torrents: Vec<Torrent>) -> Self {
        FakeClient {
            torrents: Mutex::new(torrents.into_iter().map(|t| (t.hash.clone(), t)).collect()),
            global_limits: GlobalShareLimits {
                ratio_enabled: true,
                ratio: 2.0,
                seed_time_enabled: false,
                seed_time_minutes: -1,
            },
            calls: Mutex::new(Vec::new()),
            created_categories: Mutex::new(Vec::new()),
        }
    }

    async fn record(&self, op: &str, hash: &str) {
        self.calls.lock().await.push(RecordedCall {
            op: op.to_string(),
            hash: hash.to_string(),
        });
    }

    async fn get(&self, hash: &str) -> Result<Torrent> {
        self.torrents
            .lock()
            .await
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::ClientNotFound(hash.to_string()))
    }
}

#[async_trait]
impl TorrentClient for FakeClient {
    async fn list_torrents(&self, filter: TorrentFilter) -> Result<Vec<Torrent>> {
        let torrents = self.torrents.lock().await;
        Ok(torrents
            .values()
            .filter(|t| filter.category.as_deref().map_or(true, |c| t.category == c))
            .filter(|t| filter.tag.as_deref().map_or(true, |tag| t.tags.contains(tag)))
            .cloned()
            .collect())
    }

    async fn set_category(&self, hash: &str, category: &str) -> Result<()> {
        self.record("set_category", hash).await;
        let mut torrents = self.torrents.lock().await;
        let torrent = torrents
            .get_mut(hash)
            .ok_or_else(|| Error::ClientNotFound(hash.to_string()))?;
        torrent.category = category.to_string();
        Ok(())
    }

    async fn create_category(&self, name: &str, save_path: &str) -> Result<()> {
        self.created_categories
            .lock()
            .await
            .push((name.to_string(), save_path.to_string()));
        Ok(())
    }

    async fn add_tags(&self, hash: &str, tags: &[String]) -> Result<()> {
        self.record("add_tags", hash).await;
        let mut torrents = self.torrents.lock().await;
        let torrent = torrents
            .get_mut(hash)
            .ok_or_else(|| Error::ClientNotFound(hash.to_string()))?;
        for tag in tags {
            torrent.tags.insert(tag.clone());
        }
        Ok(())
    }

    async fn remove_tags(&self, hash: &str, tags: &[String]) -> Result<()> {
        self.record("remove_tags", hash).await;
        let mut torrents = self.torrents.lock().await;
        let torrent = torrents
            .get_mut(hash)
            .ok_or_else(|| Error::ClientNotFound(hash.to_string()))?;
        for tag in tags {
            torrent.tags.remove(tag);
        }
        Ok(())
    }

    async fn set_share_limits(
        &self,
        hash: &str,
        ratio: f64,
        seed_time_minutes: i64,
        _inactive_seed_time_minutes: i64,
    ) -> Result<()> {
        self.record("set_share_limits", hash).await;
        let mut torrents = self.torrents.lock().await;
        let torrent = torrents
            .get_mut(hash)
            .ok_or_else(|| Error::ClientNotFound(hash.to_string()))?;
        torrent.ratio_limit = (ratio as i64).into();
        torrent.seeding_time_limit_minutes = seed_time_minutes.into();
        Ok(())
    }

    async fn set_upload_limit(&self, hash: &str, bytes_per_sec: i64) -> Result<()> {
        self.record("set_upload_limit", hash).await;
        let mut torrents = self.torrents.lock().await;
        let torrent = torrents
            .get_mut(hash)
            .ok_or_else(|| Error::ClientNotFound(hash.to_string()))?;
        torrent.upload_limit_bytes_per_sec = bytes_per_sec;
        Ok(())
    }

    async fn set_auto_management(&self, hash: &str, enabled: bool) -> Result<()> {
        self.record("set_auto_management", hash).await;
        let mut torrents = self.torrents.lock().await;
        let torrent = torrents
            .get_mut(hash)
            .ok_or_else(|| Error::ClientNotFound(hash.to_string()))?;
        torrent.auto_tmm = enabled;
        Ok(())
    }

    async fn pause(&self, hash: &str) -> Result<()> {
        self.record("pause", hash).await;
        let _ = self.get(hash).await?;
        Ok(())
    }

    async fn resume(&self, hash: &str) -> Result<()> {
        self.record("resume", hash).await;
        let _ = self.get(hash).await?;
        Ok(())
    }

    async fn recheck(&self, hash: &str) -> Result<()> {
        self.record("recheck", hash).await;
        let _ = self.get(hash).await?;
        Ok(())
    }

    async fn add_torrent(
        &self,
        _file_bytes: Vec<u8>,
        _save_path: &str,
        _category: &str,
        _tags: &[String],
        _paused: bool,
    ) -> Result<()> {
        self.record("add_torrent", "").await;
        Ok(())
    }

    async fn delete_torrent(&self, hash: &str, _delete_files: bool) -> Result<()> {
        self.record("delete_torrent", hash).await;
        self.torrents.lock().await.remove(hash);
        Ok(())
    }

    async fn get_global_share_limits(&self) -> Result<GlobalShareLimits> {
        Ok(self.global_limits)
    }

    async fn ban_peers(&self, _peers: &[String]) -> Result<()> {
        self.record("ban_peers", "").await;
        Ok(())
    }

    async fn server_version(&self) -> Result<String> {
        Ok("v4.6.0".to_string())
    }
}
