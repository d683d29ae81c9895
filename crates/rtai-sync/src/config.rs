//! Runtime configuration.
//!
//! Resolved once from the environment on first use:
//! - `RTAI_SYNC_MODE`: `strict` (default) checks condition-variable wait
//!   preconditions and reports violations as `SyncError::Precondition`;
//!   `off` skips the checks. Without the `strict` cargo feature the checks are
//!   compiled out and the variable is ignored.
//! - `RTAI_SYNC_RETRY_LIMIT`: how many consecutive transient-interrupt
//!   statuses a single kernel call absorbs before the status is escalated
//!   as a failure. Defaults to [`DEFAULT_RETRY_LIMIT`].

use std::sync::OnceLock;

/// Environment variable selecting the check level.
pub const MODE_ENV: &str = "RTAI_SYNC_MODE";
/// Environment variable overriding the transient retry bound.
pub const RETRY_LIMIT_ENV: &str = "RTAI_SYNC_RETRY_LIMIT";
/// Transient retries absorbed per kernel call when not overridden.
pub const DEFAULT_RETRY_LIMIT: u32 = 1024;

/// How much precondition checking the primitives perform.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckLevel {
    /// Waits verify that the guard owns its mutex.
    #[default]
    Strict,
    /// No precondition checks. Violations are undefined behavior of the
    /// underlying kernel call.
    Off,
}

impl CheckLevel {
    /// Parse from string (case-insensitive). Unknown values stay strict.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "disabled" | "release" => Self::Off,
            _ => Self::Strict,
        }
    }

    /// Returns true if precondition checks run.
    #[must_use]
    pub const fn checks_enabled(self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// Resolved configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub level: CheckLevel,
    pub retry_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            level: CheckLevel::Strict,
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }
}

impl SyncConfig {
    /// Reads the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// Malformed or zero retry limits fall back to the default.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let level = lookup(MODE_ENV)
            .map(|raw| CheckLevel::from_str_loose(&raw))
            .unwrap_or_default();
        let retry_limit = lookup(RETRY_LIMIT_ENV)
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_RETRY_LIMIT);
        Self { level, retry_limit }
    }
}

/// Process-wide configuration, resolved on first call.
#[must_use]
pub fn config() -> &'static SyncConfig {
    static CONFIG: OnceLock<SyncConfig> = OnceLock::new();
    CONFIG.get_or_init(SyncConfig::from_env)
}

/// Effective check level, taking the `strict` feature into account.
#[must_use]
pub fn check_level() -> CheckLevel {
    if cfg!(feature = "strict") {
        config().level
    } else {
        CheckLevel::Off
    }
}

/// Effective transient retry bound for one kernel call.
#[must_use]
pub fn retry_limit() -> u32 {
    config().retry_limit
}
