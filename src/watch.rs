//! Configuration-file watcher (§5 "watching the authentication-settings file
//! for external edits", generalized per SPEC_FULL.md §12: there is no
//! separate auth-settings file once the HTTP control plane is out of scope,
//! so the reconciliation config file takes its place as the watched target).
//!
//! A non-recursive `notify` watch on the config file's parent directory sets
//! a shared flag whenever a filesystem event touches a path matching the
//! configured glob. The orchestrator reloads the configuration from disk on
//! every run regardless, so this does not gate correctness; it exists so a
//! long-lived scheduled process can log that an edit landed between runs,
//! the same early-warning role the source's watcher plays for its
//! auth-settings file.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glob::Pattern;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{Error, Result};

/// Watches the directory containing the configured glob for changes to any
/// path the glob matches. Dropping this value stops the watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    changed: Arc<AtomicBool>,
}

impl ConfigWatcher {
    /// `config_glob` is the same pattern `--config-file` accepts; only the
    /// parent directory is watched (non-recursive), and only events whose
    /// path matches the glob flip the flag.
    pub fn new(config_glob: &str) -> Result<Self> {
        let pattern = Pattern::new(config_glob).map_err(|e| Error::Config(e.to_string()))?;
        let dir = Path::new(config_glob)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| Path::new(".").to_path_buf());

        let changed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&changed);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if event.paths.iter().any(|p| pattern.matches_path(p)) {
                flag.store(true, Ordering::SeqCst);
            }
        })
        .map_err(|e| Error::Config(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(ConfigWatcher {
            _watcher: watcher,
            changed,
        })
    }

    /// Returns whether a matching change has landed since the last call,
    /// clearing the flag.
    pub fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn detects_edit_to_matching_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.yml");
        std::fs::write(&config_path, "qbt:\n  host: x\n").unwrap();

        let pattern = dir.path().join("*.yml");
        let watcher = ConfigWatcher::new(pattern.to_str().unwrap()).unwrap();
        assert!(!watcher.take_changed());

        std::fs::write(&config_path, "qbt:\n  host: y\n").unwrap();

        let mut seen = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if watcher.take_changed() {
                seen = true;
                break;
            }
        }
        assert!(seen, "expected a change notification for the edited config file");
    }

    #[tokio::test]
    async fn ignores_edit_to_non_matching_file() {
        let dir = TempDir::new().unwrap();
        let other_path = dir.path().join("notes.txt");
        std::fs::write(&other_path, "irrelevant").unwrap();

        let pattern = dir.path().join("*.yml");
        let watcher = ConfigWatcher::new(pattern.to_str().unwrap()).unwrap();

        std::fs::write(&other_path, "still irrelevant").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!watcher.take_changed());
    }
}
