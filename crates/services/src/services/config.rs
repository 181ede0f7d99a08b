//! Runtime configuration read from the environment.

use std::{net::IpAddr, str::FromStr, time::Duration};

use secrecy::SecretString;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://habitforge.db";
pub const DEFAULT_AI_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_STREAK_SWEEP_SECS: u64 = 3600;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub database_url: String,
    pub anthropic_api_key: Option<SecretString>,
    pub ai_model: String,
    pub streak_sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = parse(&get, "HOST", default_host())?;
        let port = parse(&get, "PORT", DEFAULT_PORT)?;
        let sweep_secs = parse(&get, "HABITFORGE_STREAK_SWEEP_SECS", DEFAULT_STREAK_SWEEP_SECS)?;
        if sweep_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "HABITFORGE_STREAK_SWEEP_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            host,
            port,
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            anthropic_api_key: get("ANTHROPIC_API_KEY").map(SecretString::from),
            ai_model: get("HABITFORGE_AI_MODEL").unwrap_or_else(|| DEFAULT_AI_MODEL.to_string()),
            streak_sweep_interval: Duration::from_secs(sweep_secs),
        })
    }

    pub fn ai_enabled(&self) -> bool {
        self.anthropic_api_key.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            anthropic_api_key: None,
            ai_model: DEFAULT_AI_MODEL.to_string(),
            streak_sweep_interval: Duration::from_secs(DEFAULT_STREAK_SWEEP_SECS),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.host.to_string(), "127.0.0.1");
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.ai_model, DEFAULT_AI_MODEL);
        assert_eq!(config.streak_sweep_interval, Duration::from_secs(3600));
        assert!(!config.ai_enabled());
    }

    #[test]
    fn values_override_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("HOST", "0.0.0.0"),
            ("PORT", "8080"),
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("HABITFORGE_STREAK_SWEEP_SECS", "60"),
            ("DATABASE_URL", "  "),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host.to_string(), "0.0.0.0");
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(
            config.anthropic_api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("sk-test".to_string())
        );
        assert_eq!(config.streak_sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PORT",
                value: "eighty".to_string()
            }
        );
        assert!(Config::from_lookup(lookup(&[("HABITFORGE_STREAK_SWEEP_SECS", "0")])).is_err());
    }
}
