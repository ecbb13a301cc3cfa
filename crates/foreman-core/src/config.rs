//! Configuration, loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

/// Default admission trigger label.
pub const DEFAULT_TRIGGER_LABEL: &str = "bot";

/// Default poll interval in minutes.
pub const DEFAULT_POLL_INTERVAL_MINUTES: u64 = 5;

/// Attempts before an issue is escalated to REJECT.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Linear backoff unit: 30, 60, 90 minutes.
pub const DEFAULT_RETRY_BASE_DELAY_MINUTES: u64 = 30;

/// Bound on each statement of the scheduling transaction.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 300;

/// Bound on each outbound tracker / provisioning / delegation call.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Discovery window used when the store is still empty.
pub const DEFAULT_INITIAL_LOOKBACK_MINUTES: u64 = 60;

/// Upper bound for every configured duration (one year).
pub const MAX_CONFIGURED_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForemanConfig {
    /// An issue must carry at least one of these to be admitted.
    pub trigger_labels: Vec<String>,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub statement_timeout: Duration,
    pub readiness_timeout: Duration,
    pub request_timeout: Duration,
    pub initial_lookback: Duration,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            trigger_labels: vec![DEFAULT_TRIGGER_LABEL.to_string()],
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_MINUTES * 60),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: Duration::from_secs(DEFAULT_RETRY_BASE_DELAY_MINUTES * 60),
            statement_timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
            readiness_timeout: Duration::from_secs(DEFAULT_READINESS_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            initial_lookback: Duration::from_secs(DEFAULT_INITIAL_LOOKBACK_MINUTES * 60),
        }
    }
}

impl ForemanConfig {
    /// Create configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `FOREMAN_TRIGGER_LABELS`: comma-separated trigger labels (default: bot)
    /// - `FOREMAN_POLL_INTERVAL_MINUTES`: tick interval (default: 5)
    /// - `FOREMAN_MAX_ATTEMPTS`: attempts before REJECT (default: 3)
    /// - `FOREMAN_RETRY_BASE_DELAY_MINUTES`: backoff unit (default: 30)
    /// - `FOREMAN_STATEMENT_TIMEOUT_SECS`: scheduling statement bound (default: 10)
    /// - `FOREMAN_READINESS_TIMEOUT_SECS`: container readiness wait (default: 300)
    /// - `FOREMAN_REQUEST_TIMEOUT_SECS`: outbound call bound (default: 30)
    /// - `FOREMAN_INITIAL_LOOKBACK_MINUTES`: first discovery window (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading through `lookup` instead of the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let trigger_labels = match lookup("FOREMAN_TRIGGER_LABELS") {
            Some(raw) => parse_label_list(&raw),
            None => defaults.trigger_labels,
        };

        let poll_interval = duration(
            &lookup,
            "FOREMAN_POLL_INTERVAL_MINUTES",
            DEFAULT_POLL_INTERVAL_MINUTES,
            60,
        )?;
        let max_attempts = positive(
            &lookup,
            "FOREMAN_MAX_ATTEMPTS",
            u64::from(DEFAULT_MAX_ATTEMPTS),
        )?;
        let max_attempts = u32::try_from(max_attempts).map_err(|_| ConfigError::Invalid {
            key: "FOREMAN_MAX_ATTEMPTS",
            value: max_attempts.to_string(),
        })?;
        let retry_base_delay = duration(
            &lookup,
            "FOREMAN_RETRY_BASE_DELAY_MINUTES",
            DEFAULT_RETRY_BASE_DELAY_MINUTES,
            60,
        )?;
        let statement_timeout = duration(
            &lookup,
            "FOREMAN_STATEMENT_TIMEOUT_SECS",
            DEFAULT_STATEMENT_TIMEOUT_SECS,
            1,
        )?;
        let readiness_timeout = duration(
            &lookup,
            "FOREMAN_READINESS_TIMEOUT_SECS",
            DEFAULT_READINESS_TIMEOUT_SECS,
            1,
        )?;
        let request_timeout = duration(
            &lookup,
            "FOREMAN_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
            1,
        )?;
        let initial_lookback = duration(
            &lookup,
            "FOREMAN_INITIAL_LOOKBACK_MINUTES",
            DEFAULT_INITIAL_LOOKBACK_MINUTES,
            60,
        )?;

        Ok(Self {
            trigger_labels,
            poll_interval,
            max_attempts,
            retry_base_delay,
            statement_timeout,
            readiness_timeout,
            request_timeout,
            initial_lookback,
        })
    }
}

fn parse_label_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn positive<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}

/// A positive count of `unit_secs`, capped at `MAX_CONFIGURED_SECS`.
fn duration<F>(
    lookup: &F,
    key: &'static str,
    default: u64,
    unit_secs: u64,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let count = positive(lookup, key, default)?;
    match count.checked_mul(unit_secs) {
        Some(secs) if secs <= MAX_CONFIGURED_SECS => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Invalid {
            key,
            value: count.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ForemanConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, ForemanConfig::default());
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_base_delay, Duration::from_secs(30 * 60));
        assert_eq!(config.statement_timeout, Duration::from_secs(10));
    }

    #[test]
    fn trigger_labels_are_trimmed_and_blanks_dropped() {
        let config =
            ForemanConfig::from_lookup(lookup_from(&[("FOREMAN_TRIGGER_LABELS", " bot, ,ai ,")]))
                .unwrap();
        assert_eq!(config.trigger_labels, vec!["bot", "ai"]);
    }

    #[test]
    fn poll_interval_is_read_in_minutes() {
        let config =
            ForemanConfig::from_lookup(lookup_from(&[("FOREMAN_POLL_INTERVAL_MINUTES", "2")]))
                .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(120));
    }

    #[test]
    fn zero_or_garbage_is_rejected() {
        let err =
            ForemanConfig::from_lookup(lookup_from(&[("FOREMAN_POLL_INTERVAL_MINUTES", "0")]))
                .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "FOREMAN_POLL_INTERVAL_MINUTES",
                value: "0".into()
            }
        );

        assert!(
            ForemanConfig::from_lookup(lookup_from(&[("FOREMAN_MAX_ATTEMPTS", "three")])).is_err()
        );
    }

    #[rstest]
    #[case::overflowing_minutes("FOREMAN_POLL_INTERVAL_MINUTES", u64::MAX.to_string())]
    #[case::past_one_year("FOREMAN_INITIAL_LOOKBACK_MINUTES", (366 * 24 * 60).to_string())]
    #[case::huge_seconds("FOREMAN_REQUEST_TIMEOUT_SECS", u64::MAX.to_string())]
    #[case::huge_backoff("FOREMAN_RETRY_BASE_DELAY_MINUTES", (u64::MAX / 60 + 1).to_string())]
    fn out_of_range_durations_are_rejected(#[case] key: &'static str, #[case] value: String) {
        let err = ForemanConfig::from_lookup(lookup_from(&[(key, value.as_str())])).unwrap_err();
        assert_eq!(err, ConfigError::Invalid { key, value });
    }

    #[test]
    fn one_year_is_the_largest_accepted_duration() {
        let config = ForemanConfig::from_lookup(lookup_from(&[(
            "FOREMAN_INITIAL_LOOKBACK_MINUTES",
            "525600",
        )]))
        .unwrap();
        assert_eq!(config.initial_lookback, Duration::from_secs(MAX_CONFIGURED_SECS));
    }
}
