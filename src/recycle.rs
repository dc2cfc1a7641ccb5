//! Recycle bin (§4.6): deferred deletion with a per-name JSON manifest, and
//! the reaper sweep shared by both the recycle bin and orphaned-data roots
//! (grounded in `config.py::cleanup_dirs`, which reuses one implementation
//! for both).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::client::TorrentClient;
use crate::error::Result;
use crate::fs::{copy, move_file, remove_empty_dirs, walk};
use crate::model::Torrent;

/// Per-torrent-name manifest (§3). `deleted_contents` is monotonic: it may
/// transition `false -> true` across re-deletions of the same name but
/// never back.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    pub torrent_name: String,
    pub category: String,
    pub tracker_torrent_files: HashMap<String, Vec<String>>,
    pub files: Vec<String>,
    pub deleted_contents: bool,
}

impl Manifest {
    fn merge(self, other: Manifest) -> Manifest {
        let mut tracker_torrent_files = self.tracker_torrent_files;
        for (k, mut v) in other.tracker_torrent_files {
            tracker_torrent_files.entry(k).or_default().append(&mut v);
        }
        let mut files = self.files;
        for f in other.files {
            if !files.contains(&f) {
                files.push(f);
            }
        }
        Manifest {
            torrent_name: other.torrent_name,
            category: other.category,
            tracker_torrent_files,
            files,
            deleted_contents: self.deleted_contents || other.deleted_contents,
        }
    }
}

/// Additional manifest fields the caller supplies for a single recycle
/// operation; merged with whatever is already on disk for this name.
#[derive(Debug, Clone, Default)]
pub struct ManifestFields {
    pub category: String,
    pub tracker_torrent_files: HashMap<String, Vec<String>>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecycleBin {
    pub enabled: bool,
    pub recycle_root: PathBuf,
    pub split_by_category: bool,
    pub save_torrents: bool,
    /// The client's `.torrent`/`.fastresume` storage directory, consulted
    /// only when `save_torrents` is set.
    pub torrents_dir: Option<PathBuf>,
}

impl RecycleBin {
    fn recycle_dir_for(&self, category: &str) -> PathBuf {
        if self.split_by_category && !category.is_empty() {
            self.recycle_root.join(category)
        } else {
            self.recycle_root.clone()
        }
    }

    /// Copies every sidecar file in the configured `torrents_dir` whose
    /// name starts with `torrent`'s info-hash into `<recycle_dir>/torrents`,
    /// returning their filenames (`tor_delete_recycle`'s `dot_torrent_files`
    /// loop in the original: `if File.startswith(info_hash)`).
    async fn copy_torrent_sidecars(&self, category: &str, torrent: &Torrent) -> Result<Vec<String>> {
        let Some(torrents_dir) = &self.torrents_dir else {
            return Ok(Vec::new());
        };
        let dest_dir = self.recycle_dir_for(category).join("torrents");
        fs::create_dir_all(&dest_dir).await?;

        let mut copied = Vec::new();
        let mut entries = match fs::read_dir(torrents_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        while let Some(entry) = entries.next_entry().await.ok().flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&torrent.hash) {
                copy(&torrents_dir.join(name.as_ref()), &dest_dir.join(name.as_ref())).await?;
                copied.push(name.to_string());
            }
        }
        Ok(copied)
    }

    fn manifest_path(&self, category: &str, name: &str) -> PathBuf {
        self.recycle_dir_for(category).join("torrents_json").join(format!("{name}.json"))
    }

    async fn load_manifest(&self, category: &str, name: &str) -> Manifest {
        let path = self.manifest_path(category, name);
        match fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Manifest::default(),
        }
    }

    async fn write_manifest(&self, category: &str, manifest: &Manifest) -> Result<()> {
        let path = self.manifest_path(category, &manifest.torrent_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| crate::error::Error::Filesystem(e.to_string()))?;
        fs::write(path, json).await?;
        Ok(())
    }

    /// `recycle(torrent, delete_contents, manifest_fields)` — the single
    /// operation evaluators call (§4.6).
    pub async fn recycle(
        &self,
        client: &dyn TorrentClient,
        torrent: &Torrent,
        delete_contents: bool,
        fields: ManifestFields,
    ) -> Result<()> {
        if !self.enabled {
            client.delete_torrent(&torrent.hash, delete_contents).await?;
            return Ok(());
        }

        if delete_contents {
            let dest_root = self.recycle_dir_for(&fields.category).join(&torrent.name);
            let content_root = Path::new(&torrent.content_path);
            for file in &torrent.files {
                let src = content_root.join(&file.name);
                let dst = dest_root.join(&file.name);
                move_file(&src, &dst, true).await?;
            }

            let mut tracker_torrent_files = fields.tracker_torrent_files;
            if self.save_torrents {
                let sidecars = self.copy_torrent_sidecars(&fields.category, torrent).await?;
                if !sidecars.is_empty() {
                    let tracker_key = torrent.trackers.first().map(|t| t.url.clone()).unwrap_or_default();
                    tracker_torrent_files.entry(tracker_key).or_default().extend(sidecars);
                }
            }

            let existing = self.load_manifest(&fields.category, &torrent.name).await;
            let incoming = Manifest {
                torrent_name: torrent.name.clone(),
                category: fields.category.clone(),
                tracker_torrent_files,
                files: fields.files,
                deleted_contents: true,
            };
            let merged = existing.merge(incoming);
            self.write_manifest(&fields.category, &merged).await?;

            client.delete_torrent(&torrent.hash, true).await?;
            remove_empty_dirs(content_root, &[], &[]).await?;
        } else {
            client.delete_torrent(&torrent.hash, false).await?;
        }
        Ok(())
    }
}

/// Which root the reaper sweep targets. Both locations share the exact
/// same sweep implementation (§16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapLocation {
    RecycleBin,
    Orphaned,
}

#[derive(Debug, Clone, Default)]
pub struct ReapStats {
    pub num_deleted: usize,
    pub bytes_deleted: u64,
}

/// Permanently deletes any regular file under `roots` whose mtime is older
/// than `empty_after_x_days`, then prunes directories left empty. When
/// `split_by_category` is set for the recycle bin, the caller passes one
/// root per category subdirectory.
pub async fn reap(location: ReapLocation, roots: &[PathBuf], empty_after_x_days: i64) -> Result<ReapStats> {
    tracing::info!(?location, roots = roots.len(), "running reaper sweep");
    let mut stats = ReapStats::default();
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs((empty_after_x_days.max(0) as u64) * 86_400))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    for root in roots {
        let files = walk(root, &[]).await?;
        for file in files {
            let meta = match fs::metadata(&file).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            let modified = match meta.modified() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if modified <= cutoff {
                let size = meta.len();
                if fs::remove_file(&file).await.is_ok() {
                    stats.num_deleted += 1;
                    stats.bytes_deleted += size;
                }
            }
        }
        remove_empty_dirs(root, &[], &[]).await?;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;
    use crate::model::{Limit, TorrentFile, TorrentState};
    use filetime::{set_file_mtime, FileTime};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn torrent(hash: &str, name: &str, content_path: &Path, files: Vec<TorrentFile>) -> Torrent {
        Torrent {
            hash: hash.to_string(),
            name: name.to_string(),
            category: "movies".to_string(),
            tags: HashSet::new(),
            save_path: content_path.to_string_lossy().to_string(),
            content_path: content_path.to_string_lossy().to_string(),
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
            files,
            auto_tmm: true,
            added_on: 0,
        }
    }

    #[tokio::test]
    async fn recycle_moves_files_and_writes_manifest() {
        let content_dir = TempDir::new().unwrap();
        let recycle_dir = TempDir::new().unwrap();
        tokio::fs::write(content_dir.path().join("movie.mkv"), b"data").await.unwrap();

        let t = torrent(
            "a",
            "Movie.2020",
            content_dir.path(),
            vec![TorrentFile {
                name: "movie.mkv".to_string(),
                size: 4,
            }],
        );
        let client = FakeClient::new(vec![t.clone()]);
        let bin = RecycleBin {
            enabled: true,
            recycle_root: recycle_dir.path().to_path_buf(),
            split_by_category: false,
            save_torrents: false,
            torrents_dir: None,
        };
        bin.recycle(
            &client,
            &t,
            true,
            ManifestFields {
                category: "movies".to_string(),
                tracker_torrent_files: HashMap::new(),
                files: vec!["movie.mkv".to_string()],
            },
        )
        .await
        .unwrap();

        assert!(recycle_dir.path().join("Movie.2020/movie.mkv").exists());
        let manifest_path = recycle_dir.path().join("torrents_json/Movie.2020.json");
        assert!(manifest_path.exists());
        let manifest: Manifest = serde_json::from_str(&tokio::fs::read_to_string(manifest_path).await.unwrap()).unwrap();
        assert!(manifest.deleted_contents);
    }

    #[tokio::test]
    async fn deleted_contents_is_monotonic_across_recycles() {
        let content_dir = TempDir::new().unwrap();
        let recycle_dir = TempDir::new().unwrap();
        let t = torrent("a", "Movie.2020", content_dir.path(), vec![]);
        let client = FakeClient::new(vec![t.clone()]);
        let bin = RecycleBin {
            enabled: true,
            recycle_root: recycle_dir.path().to_path_buf(),
            split_by_category: false,
            save_torrents: false,
            torrents_dir: None,
        };

        bin.recycle(
            &client,
            &t,
            true,
            ManifestFields {
                category: "movies".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        bin.recycle(
            &client,
            &t,
            false,
            ManifestFields {
                category: "movies".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let manifest_path = recycle_dir.path().join("torrents_json/Movie.2020.json");
        let manifest: Manifest = serde_json::from_str(&tokio::fs::read_to_string(manifest_path).await.unwrap()).unwrap();
        assert!(manifest.deleted_contents);
    }

    #[tokio::test]
    async fn reap_deletes_only_files_past_retention() {
        let dir = TempDir::new().unwrap();
        let old_file = dir.path().join("old.mkv");
        let new_file = dir.path().join("new.mkv");
        tokio::fs::write(&old_file, b"x").await.unwrap();
        tokio::fs::write(&new_file, b"x").await.unwrap();
        set_file_mtime(&old_file, FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(10 * 86_400),
        ))
        .unwrap();

        let stats = reap(ReapLocation::RecycleBin, &[dir.path().to_path_buf()], 7)
            .await
            .unwrap();
        assert_eq!(stats.num_deleted, 1);
        assert!(!old_file.exists());
        assert!(new_file.exists());
    }
}
