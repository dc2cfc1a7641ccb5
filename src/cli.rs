//! Command-line surface of the engine binary (§6; the HTTP plane is out of
//! scope). Every flag is also reachable via an uppercase `QBT_`-prefixed
//! environment variable, the way `clap`'s `env` attribute is used by the
//! maintenance-tool CLI this module's shape is grounded on.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "qbt-reconcile", about = "Reconciliation engine for a torrent client")]
pub struct Cli {
    /// Run once and exit instead of entering the scheduled loop.
    #[arg(long, env = "QBT_RUN")]
    pub run: bool,

    /// Interval in minutes for the scheduled loop, when no persistent
    /// schedule file and no cron expression are configured.
    #[arg(long, env = "QBT_SCHEDULE")]
    pub schedule: Option<String>,

    /// Seconds to sleep before the first run (scheduled or one-shot).
    #[arg(long, env = "QBT_STARTUP_DELAY", default_value_t = 0)]
    pub startup_delay: u64,

    /// Glob matching one or more configuration files; each is loaded and
    /// run independently.
    #[arg(long, env = "QBT_CONFIG_FILE", default_value = "config.yml")]
    pub config_file: String,

    /// Optional path to additionally log to (non-blocking file appender).
    #[arg(long, env = "QBT_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[arg(long, env = "QBT_CROSS_SEED")]
    pub cross_seed: bool,

    #[arg(long, env = "QBT_RECHECK")]
    pub recheck: bool,

    #[arg(long, env = "QBT_CAT_UPDATE")]
    pub cat_update: bool,

    #[arg(long, env = "QBT_TAG_UPDATE")]
    pub tag_update: bool,

    #[arg(long, env = "QBT_REM_UNREGISTERED")]
    pub rem_unregistered: bool,

    #[arg(long, env = "QBT_TAG_TRACKER_ERROR")]
    pub tag_tracker_error: bool,

    #[arg(long, env = "QBT_REM_ORPHANED")]
    pub rem_orphaned: bool,

    #[arg(long, env = "QBT_TAG_NOHARDLINKS")]
    pub tag_nohardlinks: bool,

    #[arg(long, env = "QBT_SHARE_LIMITS")]
    pub share_limits: bool,

    /// Suppresses both recycle-bin and orphaned-data reaper sweeps without
    /// disabling the evaluators that feed them.
    #[arg(long, env = "QBT_SKIP_CLEANUP")]
    pub skip_cleanup: bool,

    #[arg(long, env = "QBT_SKIP_QB_VERSION_CHECK")]
    pub skip_qb_version_check: bool,

    #[arg(long, env = "QBT_DRY_RUN")]
    pub dry_run: bool,

    #[arg(long, env = "QBT_LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Character used to draw the cosmetic separator line printed at the
    /// start of each evaluator's span.
    #[arg(long, env = "QBT_DIVIDER", default_value = "=")]
    pub divider: String,

    #[arg(long, env = "QBT_WIDTH", default_value_t = 100)]
    pub width: usize,

    #[arg(long, env = "QBT_DEBUG")]
    pub debug: bool,

    #[arg(long, env = "QBT_TRACE")]
    pub trace: bool,
}

impl Cli {
    /// Whether any individual evaluator flag was explicitly requested. When
    /// none are set, a `--run` invocation runs every evaluator (matches the
    /// "no flags means everything" convention the source uses for a bare
    /// one-shot run).
    pub fn any_evaluator_flag_set(&self) -> bool {
        self.cross_seed
            || self.recheck
            || self.cat_update
            || self.tag_update
            || self.rem_unregistered
            || self.tag_tracker_error
            || self.rem_orphaned
            || self.tag_nohardlinks
            || self.share_limits
    }

    pub fn effective_log_level(&self) -> &str {
        if self.trace {
            "TRACE"
        } else if self.debug {
            "DEBUG"
        } else {
            &self.log_level
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_evaluator_flags_reports_false() {
        let cli = Cli::parse_from(["qbt-reconcile", "--run"]);
        assert!(!cli.any_evaluator_flag_set());
    }

    #[test]
    fn single_evaluator_flag_reports_true() {
        let cli = Cli::parse_from(["qbt-reconcile", "--run", "--recheck"]);
        assert!(cli.any_evaluator_flag_set());
    }

    #[test]
    fn trace_flag_overrides_log_level() {
        let cli = Cli::parse_from(["qbt-reconcile", "--trace", "--log-level", "INFO"]);
        assert_eq!(cli.effective_log_level(), "TRACE");
    }

    #[test]
    fn debug_flag_overrides_log_level_when_not_tracing() {
        let cli = Cli::parse_from(["qbt-reconcile", "--debug", "--log-level", "INFO"]);
        assert_eq!(cli.effective_log_level(), "DEBUG");
    }
}
