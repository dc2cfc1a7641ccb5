//! Configuration file loading.
//!
//! One YAML document per configuration file (§6). Every optional field uses
//! `#[serde(default = "fn")]` the way the teacher's configuration loader
//! does, and the structs carrying secrets (`Qbt`, `Notifiarr`, `Bhd`) get a
//! hand-written `Debug` impl that redacts them, mirroring the teacher's
//! redacting `Debug` impls for its own secret-carrying config structs.
//!
//! Values may carry a literal `!ENV VAR` tag; the loader resolves it against
//! the process environment, but remembers where it found the tag so a later
//! `dump()` can re-emit the literal form instead of the resolved value.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{Error, Result};

fn default_true() -> bool {
    true
}

fn default_tracker_error_tag() -> String {
    "issue".to_string()
}

fn default_share_limits_tag() -> String {
    "share_limit".to_string()
}

fn default_nohardlinks_tag() -> String {
    "noHL".to_string()
}

fn default_ignore_tags_on_update() -> Vec<String> {
    vec![
        default_nohardlinks_tag(),
        default_tracker_error_tag(),
        "cross-seed".to_string(),
    ]
}

fn default_max_orphaned_files_to_delete() -> i64 {
    -1
}

fn default_empty_after_x_days() -> i64 {
    7
}

/// `qbt:` section. Carries the client's connection secrets, redacted on
/// `Debug`.
#[derive(Clone, Deserialize, Serialize)]
pub struct Qbt {
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
}

impl std::fmt::Debug for Qbt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Qbt")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// `settings:` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub force_auto_tmm: bool,
    #[serde(default)]
    pub force_auto_tmm_ignore_tags: Vec<String>,
    #[serde(default = "default_tracker_error_tag")]
    pub tracker_error_tag: String,
    #[serde(default = "default_share_limits_tag")]
    pub share_limits_tag: String,
    #[serde(default = "default_nohardlinks_tag")]
    pub nohardlinks_tag: String,
    #[serde(default = "default_ignore_tags_on_update")]
    pub ignore_tags_on_update: Vec<String>,
    #[serde(default = "default_true")]
    pub cat_filter_completed: bool,
    #[serde(default = "default_true")]
    pub share_limits_filter_completed: bool,
    #[serde(default = "default_true")]
    pub tag_nohardlinks_filter_completed: bool,
    #[serde(default = "default_true")]
    pub tag_stalled_torrents: bool,
    #[serde(default)]
    pub cat_update_all: bool,
    #[serde(default)]
    pub stalled_tag: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            force_auto_tmm: false,
            force_auto_tmm_ignore_tags: Vec::new(),
            tracker_error_tag: default_tracker_error_tag(),
            share_limits_tag: default_share_limits_tag(),
            nohardlinks_tag: default_nohardlinks_tag(),
            ignore_tags_on_update: default_ignore_tags_on_update(),
            cat_filter_completed: true,
            share_limits_filter_completed: true,
            tag_nohardlinks_filter_completed: true,
            tag_stalled_torrents: true,
            cat_update_all: false,
            stalled_tag: None,
        }
    }
}

/// `directory:` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Directory {
    pub root_dir: String,
    #[serde(default)]
    pub remote_dir: Option<String>,
    #[serde(default)]
    pub cross_seed: Option<String>,
    #[serde(default)]
    pub recycle_bin: Option<String>,
    #[serde(default)]
    pub torrents_dir: Option<String>,
    #[serde(default)]
    pub orphaned_dir: Option<String>,
}

impl Directory {
    /// Resolved remote directory: `remote_dir` when configured, else
    /// `root_dir`, mirroring the source's fallback.
    pub fn remote_dir_resolved(&self) -> &str {
        self.remote_dir.as_deref().unwrap_or(&self.root_dir)
    }

    pub fn recycle_dir_resolved(&self) -> String {
        self.recycle_bin
            .clone()
            .unwrap_or_else(|| format!("{}/.RecycleBin", self.remote_dir_resolved()))
    }

    pub fn orphaned_dir_resolved(&self) -> String {
        self.orphaned_dir
            .clone()
            .unwrap_or_else(|| format!("{}/orphaned_data", self.remote_dir_resolved()))
    }
}

/// `tracker:` section entry: `url_substring -> profile`. Order preserved so
/// first-match-wins resolution matches declaration order (§4.4, §9).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TrackerProfile {
    #[serde(default)]
    pub tag: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub max_ratio: Option<f64>,
    #[serde(default)]
    pub max_seeding_time: Option<i64>,
    #[serde(default)]
    pub min_seeding_time: Option<i64>,
    #[serde(default)]
    pub limit_upload_speed: Option<i64>,
    #[serde(default)]
    pub notifiarr: Option<String>,
}

/// `nohardlinks:` section entry, keyed by category.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NoHardLinksCategory {
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub ignore_root_dir: bool,
}

/// `share_limits:` section entry. Evaluated in declared priority order
/// (lower `priority` first, ties broken by declaration order via
/// `IndexMap`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShareLimitGroup {
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub include_all_tags: Vec<String>,
    #[serde(default)]
    pub include_any_tags: Vec<String>,
    #[serde(default)]
    pub exclude_all_tags: Vec<String>,
    #[serde(default)]
    pub exclude_any_tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub min_torrent_size: Option<u64>,
    #[serde(default)]
    pub max_torrent_size: Option<u64>,
    #[serde(default = "default_global_limit")]
    pub max_ratio: i64,
    #[serde(default = "default_global_limit")]
    pub max_seeding_time: i64,
    #[serde(default = "default_unlimited")]
    pub max_last_active: i64,
    #[serde(default)]
    pub min_seeding_time: i64,
    #[serde(default)]
    pub min_num_seeds: i64,
    #[serde(default)]
    pub min_last_active: i64,
    #[serde(default = "default_unlimited")]
    pub limit_upload_speed: i64,
    #[serde(default)]
    pub cleanup: bool,
    #[serde(default)]
    pub resume_torrent_after_change: bool,
    #[serde(default)]
    pub add_group_to_tag: bool,
    #[serde(default)]
    pub custom_tag: Option<String>,
    #[serde(default)]
    pub enable_group_upload_speed: bool,
    #[serde(default)]
    pub reset_upload_speed_on_unmet_minimums: bool,
    #[serde(default)]
    pub upload_speed_on_limit_reached: Option<i64>,
}

fn default_global_limit() -> i64 {
    -2
}

fn default_unlimited() -> i64 {
    -1
}

/// `recyclebin:` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecycleBinConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_empty_after_x_days")]
    pub empty_after_x_days: i64,
    #[serde(default)]
    pub save_torrents: bool,
    #[serde(default)]
    pub split_by_category: bool,
}

impl Default for RecycleBinConfig {
    fn default() -> Self {
        RecycleBinConfig {
            enabled: true,
            empty_after_x_days: default_empty_after_x_days(),
            save_torrents: false,
            split_by_category: false,
        }
    }
}

/// `orphaned:` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrphanedConfig {
    #[serde(default = "default_empty_after_x_days")]
    pub empty_after_x_days: i64,
    #[serde(default = "default_max_orphaned_files_to_delete")]
    pub max_orphaned_files_to_delete: i64,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for OrphanedConfig {
    fn default() -> Self {
        OrphanedConfig {
            empty_after_x_days: default_empty_after_x_days(),
            max_orphaned_files_to_delete: default_max_orphaned_files_to_delete(),
            exclude_patterns: Vec::new(),
        }
    }
}

/// Per-function webhook keys. Every entry defaults to `None` (no sink)
/// rather than being absent, matching the source's `hooks()` helper, so a
/// fan-out lookup never has to distinguish "unset" from "configured empty".
pub const WEBHOOK_FUNCTIONS: &[&str] = &[
    "cross_seed",
    "recheck",
    "cat_update",
    "tag_update",
    "rem_unregistered",
    "tag_tracker_error",
    "rem_orphaned",
    "tag_nohardlinks",
    "share_limits",
    "cleanup_dirs",
];

/// `webhooks:` section.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Webhooks {
    #[serde(default)]
    pub error: Vec<String>,
    #[serde(default)]
    pub run_start: Vec<String>,
    #[serde(default)]
    pub run_end: Vec<String>,
    #[serde(default)]
    pub function: HashMap<String, Vec<String>>,
}

impl Webhooks {
    /// Sink URLs configured for a given function key, or `None` if the
    /// function was never configured at all (distinct from configured with
    /// an empty list).
    pub fn sinks_for(&self, function: &str) -> Option<&Vec<String>> {
        self.function.get(function)
    }

    /// Normalizes the map so every known function key is present, defaulted
    /// to an empty sink list if absent from the YAML document.
    fn normalize(mut self) -> Self {
        for key in WEBHOOK_FUNCTIONS {
            self.function.entry((*key).to_string()).or_default();
        }
        self
    }
}

#[derive(Clone, Deserialize, Serialize, Default)]
pub struct AppriseConfig {
    pub api_url: String,
    #[serde(default)]
    pub notify_url: Vec<String>,
}

impl std::fmt::Debug for AppriseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppriseConfig")
            .field("api_url", &self.api_url)
            .field("notify_url", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct NotifiarrConfig {
    pub apikey: String,
    #[serde(default)]
    pub instance: Option<String>,
}

impl std::fmt::Debug for NotifiarrConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifiarrConfig")
            .field("apikey", &"<redacted>")
            .field("instance", &self.instance)
            .finish()
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct BhdConfig {
    pub apikey: String,
}

impl std::fmt::Debug for BhdConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BhdConfig")
            .field("apikey", &"<redacted>")
            .finish()
    }
}

/// Root configuration document (§6).
#[derive(Clone, Deserialize, Serialize)]
pub struct Config {
    pub qbt: Qbt,
    #[serde(default)]
    pub settings: Settings,
    pub directory: Directory,
    #[serde(default)]
    pub cat: IndexMap<String, String>,
    #[serde(default)]
    pub cat_change: HashMap<String, String>,
    #[serde(default)]
    pub tracker: IndexMap<String, TrackerProfile>,
    #[serde(default)]
    pub nohardlinks: HashMap<String, NoHardLinksCategory>,
    #[serde(default)]
    pub share_limits: IndexMap<String, ShareLimitGroup>,
    #[serde(default)]
    pub recyclebin: RecycleBinConfig,
    #[serde(default)]
    pub orphaned: OrphanedConfig,
    #[serde(default)]
    pub webhooks: Webhooks,
    #[serde(default)]
    pub apprise: Option<AppriseConfig>,
    #[serde(default)]
    pub notifiarr: Option<NotifiarrConfig>,
    #[serde(default)]
    pub bhd: Option<BhdConfig>,

    /// Path -> literal `!ENV VAR` text, recorded during load so `dump()`
    /// can restore the tag instead of the resolved value. Not part of the
    /// wire format.
    #[serde(skip)]
    pub env_markers: IndexMap<String, String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("qbt", &self.qbt)
            .field("settings", &self.settings)
            .field("directory", &self.directory)
            .field("cat", &self.cat)
            .field("tracker_profiles", &self.tracker.len())
            .field("share_limit_groups", &self.share_limits.len())
            .field("recyclebin", &self.recyclebin)
            .field("orphaned", &self.orphaned)
            .field("apprise", &self.apprise)
            .field("notifiarr", &self.notifiarr)
            .field("bhd", &self.bhd)
            .finish()
    }
}

impl Config {
    /// Loads and validates a single configuration file.
    pub fn load_from(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)?;
        Self::load_str(&raw)
    }

    /// Parses a configuration document already read into memory. Exposed
    /// separately from `load_from` so tests don't need a temp file for
    /// every parsing scenario.
    pub fn load_str(raw: &str) -> Result<Config> {
        let mut value: Value = serde_yaml::from_str(raw)?;
        let mut env_markers = IndexMap::new();
        resolve_env_tags(&mut value, &mut Vec::new(), &mut env_markers);

        let mut config: Config = serde_yaml::from_value(value)?;
        config.env_markers = env_markers;
        config.webhooks = std::mem::take(&mut config.webhooks).normalize();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for category in self.nohardlinks.keys() {
            if !self.cat.values().any(|v| v == category) && !self.cat.contains_key(category) {
                return Err(Error::Config(format!(
                    "nohardlinks category '{category}' has no matching entry in 'cat'"
                )));
            }
        }
        if self.recyclebin.save_torrents && self.directory.torrents_dir.is_none() {
            return Err(Error::Config(
                "recyclebin.save_torrents is enabled but directory.torrents_dir is unset".into(),
            ));
        }
        Ok(())
    }

    /// Serializes the configuration back to YAML, restoring any `!ENV VAR`
    /// markers recorded at load time instead of inlining the resolved
    /// value, so that load -> dump -> load is lossless (§8 round-trip law).
    pub fn dump(&self) -> Result<String> {
        let mut value = serde_yaml::to_value(self)?;
        for (path, literal) in &self.env_markers {
            if let Some(slot) = get_mut_at_path(&mut value, path) {
                *slot = Value::Tagged(Box::new(serde_yaml::value::TaggedValue::new(
                    serde_yaml::value::Tag::new("ENV"),
                    Value::String(literal.clone()),
                )));
            }
        }
        Ok(serde_yaml::to_string(&value)?)
    }
}

/// Walks a parsed YAML value tree looking for `!ENV NAME` tags, replacing
/// each with the resolved environment variable value and recording the
/// path (mapping keys joined by `/`) and the original `NAME` so `dump()`
/// can restore it. Only mapping-keyed paths are tracked; a `!ENV` tag
/// inside a sequence element round-trips its resolved value only, which
/// matches every observed use of the tag in practice (scalar config
/// values, never array elements).
fn resolve_env_tags(value: &mut Value, path: &mut Vec<String>, markers: &mut IndexMap<String, String>) {
    match value {
        Value::Tagged(tagged) if tagged.tag == serde_yaml::value::Tag::new("ENV") => {
            if let Value::String(var_name) = &tagged.value {
                let var_name = var_name.clone();
                let resolved = std::env::var(&var_name).unwrap_or_default();
                markers.insert(path.join("/"), var_name);
                *value = Value::String(resolved);
            }
        }
        Value::Mapping(map) => {
            let keys: Vec<Value> = map.keys().cloned().collect();
            for key in keys {
                if let Some(key_str) = key.as_str() {
                    path.push(key_str.to_string());
                    if let Some(entry) = map.get_mut(&key) {
                        resolve_env_tags(entry, path, markers);
                    }
                    path.pop();
                }
            }
        }
        Value::Sequence(seq) => {
            for item in seq.iter_mut() {
                resolve_env_tags(item, path, markers);
            }
        }
        _ => {}
    }
}

fn get_mut_at_path<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = value;
    for segment in path.split('/') {
        let map = current.as_mapping_mut()?;
        current = map.get_mut(Value::String(segment.to_string()))?;
    }
    Some(current)
}
