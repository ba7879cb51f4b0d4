//! Environment-variable configuration for Vigil.
//!
//! Everything operators tune lives here: classification thresholds, the
//! cooldown window, auto-resolve and escalation timing, and the optional
//! provider webhook endpoints. Unset or unparseable variables fall back to
//! the documented defaults.

use std::env;

use crate::alert::DEFAULT_AUTO_RESOLVE_MINUTES;
use crate::cooldown::{DEFAULT_COOLDOWN_WINDOW_MS, DEFAULT_MAX_ENTRIES};
use crate::notify::DEFAULT_SENDER_TIMEOUT_MS;
use crate::rules::{
    DEFAULT_FALL_CRITICAL_CONFIDENCE, DEFAULT_FALL_HIGH_CONFIDENCE,
    DEFAULT_INACTIVITY_THRESHOLD_MS, RulePolicy,
};

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
pub const DEFAULT_DB_PATH: &str = "sqlite:vigil.db?mode=rwc";

/// Default response window before an unanswered alert escalates: 15 minutes.
///
/// The upstream policy never pinned this down, so it is an explicit
/// configuration value rather than a buried constant.
pub const DEFAULT_RESPONSE_WINDOW_MINUTES: i64 = 15;

/// Default interval between sweep runs: 60 seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Runtime configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,
    /// SQLite connection string.
    pub database_url: String,
    /// Cooldown window between alerts for the same condition (ms).
    pub cooldown_window_ms: i64,
    /// Cap on tracked cooldown keys.
    pub cooldown_max_entries: usize,
    /// Classification thresholds.
    pub rules: RulePolicy,
    /// Default auto-resolve timeout for new alerts (minutes).
    pub auto_resolve_minutes: i64,
    /// Time an alert may sit unanswered before the ladder escalates (minutes).
    pub response_window_minutes: i64,
    /// Interval between sweep runs (seconds).
    pub sweep_interval_secs: u64,
    /// Bound on a single delivery attempt (ms).
    pub sender_timeout_ms: u64,
    /// Email provider webhook; unset means simulated delivery.
    pub email_webhook: Option<String>,
    /// SMS provider webhook; unset means simulated delivery.
    pub sms_webhook: Option<String>,
    /// Push provider webhook; unset means simulated delivery.
    pub push_webhook: Option<String>,
    /// Emergency-services webhook; unset disables the channel.
    pub emergency_webhook: Option<String>,
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            port: parsed_var("VIGIL_PORT", DEFAULT_PORT),
            database_url: env::var("VIGIL_DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            cooldown_window_ms: parsed_var("VIGIL_COOLDOWN_WINDOW_MS", DEFAULT_COOLDOWN_WINDOW_MS),
            cooldown_max_entries: parsed_var("VIGIL_COOLDOWN_MAX_ENTRIES", DEFAULT_MAX_ENTRIES),
            rules: RulePolicy {
                inactivity_threshold_ms: parsed_var(
                    "VIGIL_INACTIVITY_THRESHOLD_MS",
                    DEFAULT_INACTIVITY_THRESHOLD_MS,
                ),
                fall_high_confidence: parsed_var(
                    "VIGIL_FALL_HIGH_CONFIDENCE",
                    DEFAULT_FALL_HIGH_CONFIDENCE,
                ),
                fall_critical_confidence: parsed_var(
                    "VIGIL_FALL_CRITICAL_CONFIDENCE",
                    DEFAULT_FALL_CRITICAL_CONFIDENCE,
                ),
            },
            auto_resolve_minutes: parsed_var(
                "VIGIL_AUTO_RESOLVE_MINUTES",
                DEFAULT_AUTO_RESOLVE_MINUTES,
            ),
            response_window_minutes: parsed_var(
                "VIGIL_RESPONSE_WINDOW_MINUTES",
                DEFAULT_RESPONSE_WINDOW_MINUTES,
            ),
            sweep_interval_secs: parsed_var(
                "VIGIL_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            ),
            sender_timeout_ms: parsed_var("VIGIL_SENDER_TIMEOUT_MS", DEFAULT_SENDER_TIMEOUT_MS),
            email_webhook: env::var("VIGIL_EMAIL_WEBHOOK").ok(),
            sms_webhook: env::var("VIGIL_SMS_WEBHOOK").ok(),
            push_webhook: env::var("VIGIL_PUSH_WEBHOOK").ok(),
            emergency_webhook: env::var("VIGIL_EMERGENCY_WEBHOOK").ok(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: DEFAULT_DB_PATH.to_string(),
            cooldown_window_ms: DEFAULT_COOLDOWN_WINDOW_MS,
            cooldown_max_entries: DEFAULT_MAX_ENTRIES,
            rules: RulePolicy::default(),
            auto_resolve_minutes: DEFAULT_AUTO_RESOLVE_MINUTES,
            response_window_minutes: DEFAULT_RESPONSE_WINDOW_MINUTES,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            sender_timeout_ms: DEFAULT_SENDER_TIMEOUT_MS,
            email_webhook: None,
            sms_webhook: None,
            push_webhook: None,
            emergency_webhook: None,
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.cooldown_window_ms, 120_000);
        assert_eq!(config.rules.inactivity_threshold_ms, 180_000);
        assert_eq!(config.auto_resolve_minutes, 30);
        assert_eq!(config.response_window_minutes, 15);
        assert!(config.email_webhook.is_none());
    }
}
