//! Application-level configuration loading: round timing, guess range, and winning-number policy.

use std::{env, fs, io::ErrorKind, ops::RangeInclusive, path::PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "NUMBER_RUSH_CONFIG_PATH";

const DEFAULT_ROUND_DURATION_MS: u64 = 30_000;
const DEFAULT_CYCLE_INTERVAL_MS: u64 = 40_000;
const DEFAULT_NUMBER_MIN: u8 = 1;
const DEFAULT_NUMBER_MAX: u8 = 10;
const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Reasons a configuration is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Rounds must have a positive duration.
    #[error("round duration must be greater than zero")]
    ZeroDuration,
    /// A round must close before the next boundary.
    #[error("cycle interval ({interval_ms} ms) must exceed round duration ({duration_ms} ms)")]
    IntervalTooShort {
        /// Configured cycle interval.
        interval_ms: u64,
        /// Configured round duration.
        duration_ms: u64,
    },
    /// The number range is empty.
    #[error("number range is empty ({min} > {max})")]
    EmptyRange {
        /// Lower bound.
        min: u8,
        /// Upper bound.
        max: u8,
    },
    /// A fixed winning number can never be guessed.
    #[error("fixed winning number {value} lies outside {min}..={max}")]
    FixedOutOfRange {
        /// Configured fixed value.
        value: u8,
        /// Lower bound.
        min: u8,
        /// Upper bound.
        max: u8,
    },
    /// Broadcast channels need room for at least one event.
    #[error("broadcast capacity must be greater than zero")]
    ZeroCapacity,
}

/// How the winning number of a round is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WinningNumberConfig {
    /// Uniformly random inside the number range.
    #[default]
    Uniform,
    /// Always the same number.
    Fixed {
        /// Number returned for every round.
        value: u8,
    },
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    round_duration_ms: u64,
    cycle_interval_ms: u64,
    number_range: RangeInclusive<u8>,
    winning_number: WinningNumberConfig,
    broadcast_capacity: usize,
}

impl AppConfig {
    /// Build a configuration with the given timing constants and default everything else.
    pub fn new(round_duration_ms: u64, cycle_interval_ms: u64) -> Result<Self, ConfigError> {
        RawConfig {
            round_duration_ms,
            cycle_interval_ms,
            ..RawConfig::default()
        }
        .try_into()
    }

    /// Replace the winning-number policy, re-checking it against the number range.
    pub fn with_winning_number(mut self, policy: WinningNumberConfig) -> Result<Self, ConfigError> {
        check_policy(policy, &self.number_range)?;
        self.winning_number = policy;
        Ok(self)
    }

    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => match Self::try_from(raw) {
                    Ok(app_config) => {
                        info!(
                            path = %path.display(),
                            duration_ms = app_config.round_duration_ms,
                            interval_ms = app_config.cycle_interval_ms,
                            "loaded round configuration"
                        );
                        app_config
                    }
                    Err(err) => {
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "invalid config; falling back to defaults"
                        );
                        Self::default()
                    }
                },
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

    /// Fixed duration of every round, in milliseconds.
    pub fn round_duration_ms(&self) -> u64 {
        self.round_duration_ms
    }

    /// Distance between two round boundaries, in milliseconds.
    pub fn cycle_interval_ms(&self) -> u64 {
        self.cycle_interval_ms
    }

    /// Numbers a participant may pick.
    pub fn number_range(&self) -> RangeInclusive<u8> {
        self.number_range.clone()
    }

    /// Configured winning-number policy.
    pub fn winning_number(&self) -> WinningNumberConfig {
        self.winning_number
    }

    /// Events buffered per subscriber before new ones are dropped for it.
    pub fn broadcast_capacity(&self) -> usize {
        self.broadcast_capacity
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            round_duration_ms: DEFAULT_ROUND_DURATION_MS,
            cycle_interval_ms: DEFAULT_CYCLE_INTERVAL_MS,
            number_range: DEFAULT_NUMBER_MIN..=DEFAULT_NUMBER_MAX,
            winning_number: WinningNumberConfig::Uniform,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    round_duration_ms: u64,
    cycle_interval_ms: u64,
    number_range: RawRange,
    winning_number: WinningNumberConfig,
    broadcast_capacity: usize,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            round_duration_ms: DEFAULT_ROUND_DURATION_MS,
            cycle_interval_ms: DEFAULT_CYCLE_INTERVAL_MS,
            number_range: RawRange::default(),
            winning_number: WinningNumberConfig::Uniform,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRange {
    min: u8,
    max: u8,
}

impl Default for RawRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_NUMBER_MIN,
            max: DEFAULT_NUMBER_MAX,
        }
    }
}

impl TryFrom<RawConfig> for AppConfig {
    type Error = ConfigError;

    fn try_from(value: RawConfig) -> Result<Self, Self::Error> {
        if value.round_duration_ms == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        if value.cycle_interval_ms <= value.round_duration_ms {
            return Err(ConfigError::IntervalTooShort {
                interval_ms: value.cycle_interval_ms,
                duration_ms: value.round_duration_ms,
            });
        }
        let RawRange { min, max } = value.number_range;
        if min > max {
            return Err(ConfigError::EmptyRange { min, max });
        }
        let number_range = min..=max;
        check_policy(value.winning_number, &number_range)?;
        if value.broadcast_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        Ok(Self {
            round_duration_ms: value.round_duration_ms,
            cycle_interval_ms: value.cycle_interval_ms,
            number_range,
            winning_number: value.winning_number,
            broadcast_capacity: value.broadcast_capacity,
        })
    }
}

fn check_policy(policy: WinningNumberConfig, range: &RangeInclusive<u8>) -> Result<(), ConfigError> {
    match policy {
        WinningNumberConfig::Fixed { value } if !range.contains(&value) => {
            Err(ConfigError::FixedOutOfRange {
                value,
                min: *range.start(),
                max: *range.end(),
            })
        }
        _ => Ok(()),
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

    fn parse(json: &str) -> Result<AppConfig, ConfigError> {
        serde_json::from_str::<RawConfig>(json).unwrap().try_into()
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = parse("{}").unwrap();
        assert_eq!(config.round_duration_ms(), 30_000);
        assert_eq!(config.cycle_interval_ms(), 40_000);
        assert_eq!(config.number_range(), 1..=10);
        assert_eq!(config.winning_number(), WinningNumberConfig::Uniform);
    }

    #[test]
    fn interval_must_exceed_duration() {
        assert_eq!(
            parse(r#"{"round_duration_ms": 40000, "cycle_interval_ms": 40000}"#).unwrap_err(),
            ConfigError::IntervalTooShort {
                interval_ms: 40_000,
                duration_ms: 40_000
            }
        );
        assert_eq!(AppConfig::new(0, 10).unwrap_err(), ConfigError::ZeroDuration);
    }

    #[test]
    fn fixed_policy_is_parsed_and_range_checked() {
        let config = parse(r#"{"winning_number": {"kind": "fixed", "value": 6}}"#).unwrap();
        assert_eq!(
            config.winning_number(),
            WinningNumberConfig::Fixed { value: 6 }
        );

        let err = parse(
            r#"{"number_range": {"min": 1, "max": 5}, "winning_number": {"kind": "fixed", "value": 6}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::FixedOutOfRange { value: 6, .. }));
    }

    #[test]
    fn empty_range_is_rejected() {
        let err = parse(r#"{"number_range": {"min": 9, "max": 2}}"#).unwrap_err();
        assert_eq!(err, ConfigError::EmptyRange { min: 9, max: 2 });
    }
}
