// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::error::RelayError;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_RATE_LIMIT_MAX: u32 = 1000;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 15 * 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configuration for the relay server
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listening port
    pub port: u16,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// Requests admitted per client address per window
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    /// Timeout for the forwarded upstream request
    pub request_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RelayError> {
        let parsed = |key: &str| -> Result<Option<u64>, RelayError> {
            match lookup(key) {
                Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                    RelayError::InvalidConfig(format!("{key} must be a number, got '{raw}'"))
                }),
                None => Ok(None),
            }
        };

        let port = match parsed("PORT")? {
            Some(port) => u16::try_from(port)
                .map_err(|_| RelayError::InvalidConfig(format!("PORT {port} is out of range")))?,
            None => DEFAULT_PORT,
        };
        let rate_limit_max = match parsed("RELAY_RATE_LIMIT_MAX")? {
            Some(max) => u32::try_from(max).map_err(|_| {
                RelayError::InvalidConfig(format!("RELAY_RATE_LIMIT_MAX {max} is out of range"))
            })?,
            None => DEFAULT_RATE_LIMIT_MAX,
        };

        let config = Self {
            port,
            log_level: lookup("LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
            rate_limit_max,
            rate_limit_window: Duration::from_secs(
                parsed("RELAY_RATE_LIMIT_WINDOW_SECS")?.unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            ),
            request_timeout: Duration::from_secs(
                parsed("RELAY_REQUEST_TIMEOUT_SECS")?.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
        };

        config.validate()?;
        Ok(config)
    }

    /// Subscriber filter: the configured level, with HTTP stack noise silenced.
    pub fn env_filter(&self) -> String {
        format!("h2=off,hyper=off,rustls=off,{}", self.log_level)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.rate_limit_max == 0 {
            return Err(RelayError::InvalidConfig(
                "RELAY_RATE_LIMIT_MAX must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_window.is_zero() {
            return Err(RelayError::InvalidConfig(
                "RELAY_RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(RelayError::InvalidConfig(
                "RELAY_REQUEST_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(RelayError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
