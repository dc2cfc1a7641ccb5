//! Policy evaluators (§4.5). Each evaluator consumes the inventory, mutates
//! the client or filesystem, and emits events; all run in the fixed order
//! named here, each individually toggleable via the CLI/config flags.

pub mod categorize;
pub mod cross_seed;
pub mod nohardlinks;
pub mod orphans;
pub mod recheck;
pub mod share_limits;
pub mod tags;
pub mod tracker_error;

use crate::error::TorrentError;

/// Per-evaluator outcome. Counters are incremented identically whether or
/// not `dry_run` is set, so dry-run logs faithfully predict a real run's
/// summary (§7).
#[derive(Debug, Clone, Default)]
pub struct EvaluatorStats {
    pub planned: usize,
    pub applied: usize,
    pub errors: Vec<TorrentError>,
}

impl EvaluatorStats {
    pub fn record_planned(&mut self) {
        self.planned += 1;
    }

    pub fn record_applied(&mut self) {
        self.applied += 1;
    }

    pub fn record_error(&mut self, hash: impl Into<String>, name: impl Into<String>, message: impl Into<String>) {
        self.errors.push(TorrentError {
            hash: hash.into(),
            name: name.into(),
            message: message.into(),
        });
    }

    pub fn merge(&mut self, other: EvaluatorStats) {
        self.planned += other.planned;
        self.applied += other.applied;
        self.errors.extend(other.errors);
    }
}
