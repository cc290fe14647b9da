// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Configuration.
//!
//! Values come from a TOML file, then `WALLET_LEDGER_*` environment
//! variables, then command-line flags (applied by the binaries).
//!
//! ```toml
//! log_filter = "wallet_ledger=debug"
//!
//! [idempotency]
//! ttl_secs = 86400
//! policy = "strict"
//!
//! [store]
//! lock_timeout_ms = 5000
//!
//! [server]
//! listen_addr = "127.0.0.1:3000"
//! request_timeout_ms = 10000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "WALLET_LEDGER_";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// How strongly duplicate submissions are excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdempotencyPolicy {
    /// Keys are claimed inside the unit of work under a uniqueness
    /// constraint and stay claimed for good. The cache only short-circuits
    /// known duplicates, and `ttl_secs` bounds that fast path alone.
    #[default]
    Strict,
    /// Only the cache is consulted. Two racing submissions of one key can
    /// both pass the check.
    BestEffort,
}

impl std::str::FromStr for IdempotencyPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "best-effort" | "best_effort" => Ok(Self::BestEffort),
            _ => Err(ConfigError::InvalidValue {
                key: "idempotency.policy".to_string(),
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// How long a key blocks resubmission in the cache (seconds)
    pub ttl_secs: u64,
    pub policy: IdempotencyPolicy,
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            policy: IdempotencyPolicy::Strict,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Longest wait for a wallet row lock (milliseconds)
    pub lock_timeout_ms: u64,
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Deadline applied to each request's engine call (milliseconds)
    pub request_timeout_ms: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// `tracing_subscriber::EnvFilter` directives, overridden by `RUST_LOG`
    pub log_filter: String,
    pub idempotency: IdempotencyConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            idempotency: IdempotencyConfig::default(),
            store: StoreConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overrides fields from `WALLET_LEDGER_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(filter) = var("LOG") {
            self.log_filter = filter;
        }
        if let Some(ttl) = var("IDEMPOTENCY_TTL_SECS") {
            self.idempotency.ttl_secs = parse_number("IDEMPOTENCY_TTL_SECS", &ttl)?;
        }
        if let Some(policy) = var("IDEMPOTENCY_POLICY") {
            self.idempotency.policy = policy.parse()?;
        }
        if let Some(timeout) = var("LOCK_TIMEOUT_MS") {
            self.store.lock_timeout_ms = parse_number("LOCK_TIMEOUT_MS", &timeout)?;
        }
        if let Some(addr) = var("LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(timeout) = var("REQUEST_TIMEOUT_MS") {
            self.server.request_timeout_ms = parse_number("REQUEST_TIMEOUT_MS", &timeout)?;
        }
        self.validate()
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = |key: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            value: "0".to_string(),
        };
        if self.idempotency.ttl_secs == 0 {
            return Err(zero("idempotency.ttl_secs"));
        }
        if self.store.lock_timeout_ms == 0 {
            return Err(zero("store.lock_timeout_ms"));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(zero("server.request_timeout_ms"));
        }
        Ok(())
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: format!("{ENV_PREFIX}{name}"),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.idempotency.ttl(), Duration::from_secs(86_400));
        assert_eq!(config.idempotency.policy, IdempotencyPolicy::Strict);
        assert_eq!(config.store.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.server.listen_addr, "127.0.0.1:3000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [idempotency]
            policy = "best-effort"

            [store]
            lock_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.idempotency.policy, IdempotencyPolicy::BestEffort);
        assert_eq!(config.idempotency.ttl_secs, 86_400);
        assert_eq!(config.store.lock_timeout_ms, 250);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let result = Config::from_toml("[store]\nlock_timeout_ms = \"soon\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let result = Config::from_toml("[idempotency]\nttl_secs = 0");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "idempotency.ttl_secs"
        ));
    }

    #[test]
    fn env_vars_override_fields() {
        let vars: HashMap<&str, &str> = [
            ("IDEMPOTENCY_POLICY", "best_effort"),
            ("LOCK_TIMEOUT_MS", "42"),
            ("LISTEN_ADDR", "0.0.0.0:8080"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.idempotency.policy, IdempotencyPolicy::BestEffort);
        assert_eq!(config.store.lock_timeout_ms, 42);
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn non_numeric_env_value_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_vars(|name| (name == "LOCK_TIMEOUT_MS").then(|| "fast".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn policy_parses_from_text() {
        assert_eq!("STRICT".parse::<IdempotencyPolicy>().unwrap(), IdempotencyPolicy::Strict);
        assert!("sometimes".parse::<IdempotencyPolicy>().is_err());
    }
}
