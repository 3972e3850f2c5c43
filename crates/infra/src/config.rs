//! Configuration loading.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `ROLEGATE_DATABASE_URL` | unset | Postgres URL; in-memory store when unset |
//! | `ROLEGATE_DB_MAX_CONNECTIONS` | `10` | pool size |
//! | `ROLEGATE_SECRET_LENGTH` | `12` | generated credential length, at least 8 |
//! | `ROLEGATE_LOG` | `info` | default tracing filter (`RUST_LOG` wins) |
//! | `ROLEGATE_LOG_FORMAT` | `json` | `json` or `pretty` |
//! | `ROLEGATE_AUDIT_PAGE_LIMIT` | `50` | default audit page size, at most 1000 |

use thiserror::Error;

use rolegate_observability::{LogFormat, LogSettings};

use crate::credentials::RandomSecretGenerator;
use crate::store::Pagination;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be an integer, got {value:?}")]
    NotANumber { key: &'static str, value: String },

    #[error("{key} must be between {min} and {max}, got {value}")]
    OutOfRange {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("{key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub secret_length: usize,
    pub audit_page_limit: u32,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 10,
            secret_length: 12,
            audit_page_limit: Pagination::DEFAULT_LIMIT,
            log: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (environment, file, test map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let format = match get("ROLEGATE_LOG_FORMAT") {
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|e| ConfigError::Invalid {
                    key: "ROLEGATE_LOG_FORMAT",
                    message: e.to_string(),
                })?,
            None => defaults.log.format,
        };

        Ok(Self {
            database_url: get("ROLEGATE_DATABASE_URL"),
            db_max_connections: bounded(
                "ROLEGATE_DB_MAX_CONNECTIONS",
                get("ROLEGATE_DB_MAX_CONNECTIONS"),
                defaults.db_max_connections as u64,
                1,
                1000,
            )? as u32,
            secret_length: bounded(
                "ROLEGATE_SECRET_LENGTH",
                get("ROLEGATE_SECRET_LENGTH"),
                defaults.secret_length as u64,
                RandomSecretGenerator::MIN_LENGTH as u64,
                256,
            )? as usize,
            audit_page_limit: bounded(
                "ROLEGATE_AUDIT_PAGE_LIMIT",
                get("ROLEGATE_AUDIT_PAGE_LIMIT"),
                defaults.audit_page_limit as u64,
                1,
                Pagination::MAX_LIMIT as u64,
            )? as u32,
            log: LogSettings {
                filter: get("ROLEGATE_LOG").unwrap_or(defaults.log.filter),
                format,
            },
        })
    }
}

fn bounded(
    key: &'static str,
    raw: Option<String>,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value: u64 = raw
        .parse()
        .map_err(|_| ConfigError::NotANumber { key, value: raw.clone() })?;
    if value < min || value > max {
        return Err(ConfigError::OutOfRange { key, value, min, max });
    }
    Ok(value)
}
