//! Environment-driven configuration.
//!
//! Every knob has a default so an empty environment yields a working setup.
//!
//! | variable | default |
//! |---|---|
//! | `STOCKLEDGER_DEFAULT_LOCATION` | `main` |
//! | `STOCKLEDGER_EXPIRY_HORIZON_DAYS` | `30` |
//! | `STOCKLEDGER_EXPIRY_CRITICAL_DAYS` | `7` |
//! | `STOCKLEDGER_EXPIRY_WARNING_DAYS` | `15` |
//! | `STOCKLEDGER_LOG_FORMAT` | `json` |
//! | `STOCKLEDGER_LOG_FILTER` | `info` |

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_inventory::movement::DEFAULT_LOCATION;
use stockledger_inventory::AlertPolicy;
use stockledger_observability::{LogConfig, LogFormat};

pub const ENV_DEFAULT_LOCATION: &str = "STOCKLEDGER_DEFAULT_LOCATION";
pub const ENV_EXPIRY_HORIZON_DAYS: &str = "STOCKLEDGER_EXPIRY_HORIZON_DAYS";
pub const ENV_EXPIRY_CRITICAL_DAYS: &str = "STOCKLEDGER_EXPIRY_CRITICAL_DAYS";
pub const ENV_EXPIRY_WARNING_DAYS: &str = "STOCKLEDGER_EXPIRY_WARNING_DAYS";
pub const ENV_LOG_FORMAT: &str = "STOCKLEDGER_LOG_FORMAT";
pub const ENV_LOG_FILTER: &str = "STOCKLEDGER_LOG_FILTER";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Location tag applied to movements submitted without one.
    pub default_location: String,
    pub alerts: AlertPolicy,
    pub log: LogConfig,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            default_location: DEFAULT_LOCATION.to_string(),
            alerts: AlertPolicy::default(),
            log: LogConfig::default(),
        }
    }
}

impl InventoryConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let default_location = lookup(ENV_DEFAULT_LOCATION)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.default_location);

        let alerts = AlertPolicy {
            expiry_horizon_days: parse_or(
                &lookup,
                ENV_EXPIRY_HORIZON_DAYS,
                defaults.alerts.expiry_horizon_days,
            )?,
            expiry_critical_days: parse_or(
                &lookup,
                ENV_EXPIRY_CRITICAL_DAYS,
                defaults.alerts.expiry_critical_days,
            )?,
            expiry_warning_days: parse_or(
                &lookup,
                ENV_EXPIRY_WARNING_DAYS,
                defaults.alerts.expiry_warning_days,
            )?,
        };

        let log = LogConfig {
            format: parse_or::<LogFormat, _>(&lookup, ENV_LOG_FORMAT, defaults.log.format)?,
            filter: lookup(ENV_LOG_FILTER).unwrap_or(defaults.log.filter),
        };

        let config = Self {
            default_location,
            alerts,
            log,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.alerts;
        if a.expiry_critical_days < 0 {
            return Err(ConfigError::Inconsistent(format!(
                "expiry critical days must be non-negative, got {}",
                a.expiry_critical_days
            )));
        }
        if !(a.expiry_critical_days <= a.expiry_warning_days
            && a.expiry_warning_days <= a.expiry_horizon_days)
        {
            return Err(ConfigError::Inconsistent(format!(
                "expected critical ({}) <= warning ({}) <= horizon ({}) days",
                a.expiry_critical_days, a.expiry_warning_days, a.expiry_horizon_days
            )));
        }
        Ok(())
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<InventoryConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        InventoryConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(from_pairs(&[]).unwrap(), InventoryConfig::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = from_pairs(&[
            (ENV_DEFAULT_LOCATION, "warehouse-2"),
            (ENV_EXPIRY_HORIZON_DAYS, "60"),
            (ENV_LOG_FORMAT, "compact"),
            (ENV_LOG_FILTER, "stockledger=debug"),
        ])
        .unwrap();

        assert_eq!(config.default_location, "warehouse-2");
        assert_eq!(config.alerts.expiry_horizon_days, 60);
        assert_eq!(config.log.format, LogFormat::Compact);
        assert_eq!(config.log.filter, "stockledger=debug");
    }

    #[test]
    fn unparsable_values_name_the_variable() {
        let err = from_pairs(&[(ENV_EXPIRY_HORIZON_DAYS, "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_EXPIRY_HORIZON_DAYS, .. }));

        let err = from_pairs(&[(ENV_LOG_FORMAT, "xml")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_LOG_FORMAT, .. }));
    }

    #[test]
    fn cut_offs_must_nest_inside_the_horizon() {
        let err = from_pairs(&[(ENV_EXPIRY_HORIZON_DAYS, "10")]).unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }
}
