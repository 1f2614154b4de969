use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::{env_u32, env_u64};

const DEFAULT_DATABASE_URL: &str = "sqlite://./data/lingo.db";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub acquire_timeout: Duration,
    /// Attempts per concept update before giving up on a contended row.
    pub cas_max_retries: u32,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, DbConfigError> {
        let database_url = match std::env::var("DATABASE_URL") {
            Ok(value) if value.trim().is_empty() => {
                return Err(DbConfigError::Missing {
                    key: "DATABASE_URL",
                })
            }
            Ok(value) => value.trim().to_string(),
            Err(_) => DEFAULT_DATABASE_URL.to_string(),
        };

        if !database_url.starts_with("sqlite:") {
            return Err(DbConfigError::Invalid {
                key: "DATABASE_URL",
                reason: "only sqlite: urls are supported".to_string(),
            });
        }

        Ok(Self {
            database_url,
            max_connections: env_u32("DB_MAX_CONNECTIONS", 5).max(1),
            busy_timeout: Duration::from_millis(env_u64("DB_BUSY_TIMEOUT_MS", 5000)),
            acquire_timeout: Duration::from_millis(env_u64("DB_ACQUIRE_TIMEOUT_MS", 5000)),
            cas_max_retries: env_u32("CONCEPT_CAS_MAX_RETRIES", 8).max(1),
        })
    }

    /// Configuration for a database file at `path`, with default pool settings.
    pub fn for_sqlite_file(path: impl AsRef<Path>) -> Self {
        Self {
            database_url: format!("sqlite://{}", path.as_ref().display()),
            max_connections: 5,
            busy_timeout: Duration::from_millis(5000),
            acquire_timeout: Duration::from_millis(5000),
            cas_max_retries: 8,
        }
    }

    /// Filesystem location of the database, when the url names a file.
    pub fn sqlite_path(&self) -> Option<PathBuf> {
        let rest = self
            .database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))?;
        let path = rest.split('?').next().unwrap_or_default();
        if path.is_empty() || path == ":memory:" {
            return None;
        }
        Some(PathBuf::from(path))
    }
}

#[derive(Debug, Error)]
pub enum DbConfigError {
    #[error("missing required env: {key}")]
    Missing { key: &'static str },
    #[error("invalid env {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_path_strips_scheme_and_query() {
        let config = DbConfig {
            database_url: "sqlite://./data/lingo.db?mode=rwc".to_string(),
            ..DbConfig::for_sqlite_file("unused.db")
        };
        assert_eq!(config.sqlite_path(), Some(PathBuf::from("./data/lingo.db")));

        let memory = DbConfig {
            database_url: "sqlite::memory:".to_string(),
            ..DbConfig::for_sqlite_file("unused.db")
        };
        assert_eq!(memory.sqlite_path(), None);
    }
}
