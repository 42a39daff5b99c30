//! Configuration module for TaskPulse.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `TASKPULSE_DATA_DIR` | No | `~/.taskpulse` | Directory holding `tasks.json` |
//! | `TASKPULSE_POLL_INTERVAL_SECS` | No | 5 | Seconds between reconcile ticks |
//! | `TASKPULSE_REFRESH_INTERVAL_SECS` | No | 30 | Seconds between status refreshes in `watch` |
//! | `TASKPULSE_PROBE_TIMEOUT_MS` | No | 2000 | Upper bound on one session probe call |
//! | `TASKPULSE_NOTIFY_STEP` | No | 25 | Progress increase that triggers a notification (1-100) |
//!
//! # Example
//!
//! ```no_run
//! use taskpulse::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Store: {}", config.store_path().display());
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;

use crate::notifier::DEFAULT_NOTIFY_STEP;

/// Default data directory name relative to home.
const DEFAULT_DATA_DIR: &str = ".taskpulse";

/// File name of the task store inside the data directory.
pub const STORE_FILE_NAME: &str = "tasks.json";

/// Default reconcile tick period (in seconds).
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default status refresh period (in seconds).
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30;

/// Default probe timeout (in milliseconds).
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2000;

/// Maximum allowed notification step.
const MAX_NOTIFY_STEP: u8 = 100;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Configuration for TaskPulse.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the task store.
    pub data_dir: PathBuf,

    /// Period between reconcile ticks.
    pub poll_interval: Duration,

    /// Period between status refreshes in the interactive front end.
    pub refresh_interval: Duration,

    /// Upper bound on a single probe call.
    pub probe_timeout: Duration,

    /// Minimum progress increase, in points, that triggers a notification.
    pub notify_step: u8,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - Any numeric variable is set but cannot be parsed, or is zero
    /// - `TASKPULSE_NOTIFY_STEP` is outside 1-100
    /// - `TASKPULSE_DATA_DIR` is unset and the home directory cannot be determined
    pub fn from_env() -> Result<Self, ConfigError> {
        // Optional: TASKPULSE_DATA_DIR (default: ~/.taskpulse)
        let data_dir = match env::var("TASKPULSE_DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => {
                let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
                base_dirs.home_dir().join(DEFAULT_DATA_DIR)
            }
        };

        let poll_interval = Duration::from_secs(parse_positive(
            "TASKPULSE_POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
        )?);

        let refresh_interval = Duration::from_secs(parse_positive(
            "TASKPULSE_REFRESH_INTERVAL_SECS",
            DEFAULT_REFRESH_INTERVAL_SECS,
        )?);

        let probe_timeout = Duration::from_millis(parse_positive(
            "TASKPULSE_PROBE_TIMEOUT_MS",
            DEFAULT_PROBE_TIMEOUT_MS,
        )?);

        // Optional: TASKPULSE_NOTIFY_STEP (default: 25, must be 1-100)
        let notify_step = match env::var("TASKPULSE_NOTIFY_STEP") {
            Ok(val) => {
                let step = val.parse::<u8>().map_err(|_| ConfigError::InvalidValue {
                    key: "TASKPULSE_NOTIFY_STEP".to_string(),
                    message: format!("expected integer 1-{MAX_NOTIFY_STEP}, got '{val}'"),
                })?;
                if !(1..=MAX_NOTIFY_STEP).contains(&step) {
                    return Err(ConfigError::InvalidValue {
                        key: "TASKPULSE_NOTIFY_STEP".to_string(),
                        message: format!(
                            "notify step must be between 1 and {MAX_NOTIFY_STEP}, got {step}"
                        ),
                    });
                }
                step
            }
            Err(_) => DEFAULT_NOTIFY_STEP,
        };

        Ok(Self {
            data_dir,
            poll_interval,
            refresh_interval,
            probe_timeout,
            notify_step,
        })
    }

    /// Path of the JSON task store.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE_NAME)
    }
}

/// Parses an optional positive integer variable, falling back to `default`.
fn parse_positive(key: &str, default: u64) -> Result<u64, ConfigError> {
    let Ok(val) = env::var(key) else {
        return Ok(default);
    };
    let parsed = val.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected positive integer, got '{val}'"),
    })?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value must be greater than 0".to_string(),
        });
    }
    Ok(parsed)
}
