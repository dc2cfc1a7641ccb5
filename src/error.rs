//! Crate-wide error type.
//!
//! There is no HTTP surface in this engine, so unlike a request-handling
//! crate's error type, this one does not map variants to status codes. It
//! exists to give every layer (client adapter, filesystem adapter,
//! evaluators, scheduler, orchestrator) a single vocabulary for the error
//! kinds named in the error-handling design: config errors are fatal for one
//! configuration file only, client auth/version errors are fatal for a run,
//! filesystem and per-torrent errors are handled by the caller and never
//! reach here as a crate-wide variant.

#![allow(dead_code)]

use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file failed to parse or failed validation. Fatal for
    /// the affected configuration file only; the orchestrator continues
    /// with the next one.
    #[error("configuration error: {0}")]
    Config(String),

    /// Authentication with the torrent client failed.
    #[error("client authentication failed: {0}")]
    ClientAuth(String),

    /// The torrent client reported a version this engine does not support.
    #[error("unsupported client version: {0}")]
    ClientUnsupportedVersion(String),

    /// The torrent client could not be reached, after retries were
    /// exhausted.
    #[error("client connection lost: {0}")]
    ClientConnection(String),

    /// A client operation targeted a resource that does not exist.
    /// Evaluators treat this as an expected, typed outcome rather than a
    /// failure.
    #[error("client resource not found: {0}")]
    ClientNotFound(String),

    /// A client operation conflicted with existing state (e.g. an unknown
    /// category). Triggers a create-then-retry path where applicable.
    #[error("client conflict: {0}")]
    ClientConflict(String),

    /// A filesystem operation failed for a reason other than missing-source
    /// or permission, which are handled as warnings at the call site.
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// An evaluator refused to act because a configured safety threshold
    /// would be exceeded (e.g. too many orphans to delete in one sweep).
    #[error("threshold exceeded: {0}")]
    ThresholdExceeded(String),

    /// A notification sink failed to accept an event. Never propagates past
    /// the notification fan-out; kept here so sinks can report it through
    /// the same `Result` the rest of the crate uses.
    #[error("notification dispatch failed: {0}")]
    Notification(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Whether this error aborts the whole run (the orchestrator still
    /// moves on to the next configuration file) rather than just the
    /// evaluator that raised it (§7 propagation policy).
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            Error::ClientAuth(_) | Error::ClientUnsupportedVersion(_) | Error::ClientConnection(_)
        )
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// A failure scoped to a single torrent, collected by an evaluator instead
/// of aborting the pass. Mirrors the source's per-torrent `continue`.
#[derive(Debug, Clone)]
pub struct TorrentError {
    pub hash: String,
    pub name: String,
    pub message: String,
}

impl std::fmt::Display for TorrentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.hash, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torrent_error_display_includes_hash_and_message() {
        let e = TorrentError {
            hash: "abc123".into(),
            name: "Some.Torrent".into(),
            message: "category create failed".into(),
        };
        let rendered = e.to_string();
        assert!(rendered.contains("abc123"));
        assert!(rendered.contains("Some.Torrent"));
        assert!(rendered.contains("category create failed"));
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
