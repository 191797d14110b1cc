//! Demo configuration, read from the environment.

use keel_core::id::{IdConfigError, TsidConfig};
use thiserror::Error;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Invalid or missing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `DATABASE_URL` is not set.
    #[error("DATABASE_URL environment variable must be set")]
    MissingDatabaseUrl,

    /// `DATABASE_MAX_CONNECTIONS` is not a positive integer.
    #[error("DATABASE_MAX_CONNECTIONS must be a positive integer, got `{0}`")]
    InvalidMaxConnections(String),

    /// The identity generator settings are invalid.
    #[error(transparent)]
    Id(#[from] IdConfigError),
}

/// Demo settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// `PostgreSQL` connection string.
    pub database_url: String,
    /// Pool size.
    pub max_connections: u32,
    /// Identity generator settings.
    pub tsid: TsidConfig,
}

impl Config {
    /// Reads `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `TSID_NODE_COUNT`
    /// and `TSID_NODE`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;
        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidMaxConnections(raw)),
            },
        };

        Ok(Self {
            database_url,
            max_connections,
            tsid: TsidConfig::from_lookup(&lookup)?,
        })
    }
}
