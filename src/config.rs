//! Application-level configuration loading, including the race and retry
//! policy knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_DUEL_BACK_CONFIG_PATH";

/// Canonical snippet-race tie threshold. The historical implementations
/// disagreed (1 ms, 250 ms, and 1000 ms at different call sites); this value
/// is the single source of truth and only the finalizer consumes it.
const DEFAULT_TIE_THRESHOLD_MS: i64 = 250;
/// Lead time between arming a countdown and its deadline.
const DEFAULT_COUNTDOWN_LEAD_MS: i64 = 5_000;
/// Bounded retry attempts for finalizer-class transactions.
const DEFAULT_FINALIZE_MAX_ATTEMPTS: u32 = 5;
/// Base backoff delay; the n-th attempt waits n times this.
const DEFAULT_FINALIZE_BACKOFF_BASE_MS: u64 = 400;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Race timing difference at or under which a round is a tie.
    pub tie_threshold_ms: i64,
    /// Milliseconds between countdown arming and its deadline.
    pub countdown_lead_ms: i64,
    /// Attempt bound for retried transactions.
    pub finalize_max_attempts: u32,
    /// Base delay for the linear backoff between attempts.
    pub finalize_backoff_base: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to the
    /// baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        tie_threshold_ms = config.tie_threshold_ms,
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tie_threshold_ms: DEFAULT_TIE_THRESHOLD_MS,
            countdown_lead_ms: DEFAULT_COUNTDOWN_LEAD_MS,
            finalize_max_attempts: DEFAULT_FINALIZE_MAX_ATTEMPTS,
            finalize_backoff_base: Duration::from_millis(DEFAULT_FINALIZE_BACKOFF_BASE_MS),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    tie_threshold_ms: Option<i64>,
    countdown_lead_ms: Option<i64>,
    finalize_max_attempts: Option<u32>,
    finalize_backoff_base_ms: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            tie_threshold_ms: raw.tie_threshold_ms.unwrap_or(defaults.tie_threshold_ms),
            countdown_lead_ms: raw.countdown_lead_ms.unwrap_or(defaults.countdown_lead_ms),
            finalize_max_attempts: raw
                .finalize_max_attempts
                .unwrap_or(defaults.finalize_max_attempts),
            finalize_backoff_base: raw
                .finalize_backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.finalize_backoff_base),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_hold_the_canonical_threshold() {
        let config = AppConfig::default();
        assert_eq!(config.tie_threshold_ms, 250);
        assert_eq!(config.finalize_max_attempts, 5);
    }

    #[test]
    fn partial_raw_config_keeps_defaults_for_the_rest() {
        let raw: RawConfig = serde_json::from_str(r#"{ "tieThresholdMs": 100 }"#).unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.tie_threshold_ms, 100);
        assert_eq!(config.countdown_lead_ms, 5_000);
    }
}
