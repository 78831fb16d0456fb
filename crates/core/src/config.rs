//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into services. Request
//! handling never reads process-wide environment variables; the binaries do that before
//! constructing a [`CoreConfig`].

use crate::constants::{
    DEFAULT_ALLOCATION_ATTEMPTS, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_DATABASE_PATH,
};
use crate::{QuoteError, QuoteResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    database_path: PathBuf,
    busy_timeout: Duration,
    allocation_attempts: u32,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `QuoteError::InvalidInput` if the database path is empty or
    /// `allocation_attempts` is zero.
    pub fn new(
        database_path: PathBuf,
        busy_timeout: Duration,
        allocation_attempts: u32,
    ) -> QuoteResult<Self> {
        if database_path.as_os_str().is_empty() {
            return Err(QuoteError::InvalidInput(
                "database_path cannot be empty".into(),
            ));
        }
        if allocation_attempts == 0 {
            return Err(QuoteError::InvalidInput(
                "allocation_attempts must be at least 1".into(),
            ));
        }

        Ok(Self {
            database_path,
            busy_timeout,
            allocation_attempts,
        })
    }

    /// Configuration with default timeouts for the given database file.
    pub fn with_database(database_path: PathBuf) -> QuoteResult<Self> {
        Self::new(
            database_path,
            Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            DEFAULT_ALLOCATION_ATTEMPTS,
        )
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    pub fn allocation_attempts(&self) -> u32 {
        self.allocation_attempts
    }
}

/// Resolve the database path from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_DATABASE_PATH`].
pub fn database_path_from_env_value(value: Option<String>) -> PathBuf {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH))
}

/// Build a [`CoreConfig`] from the raw values of `QUOTE_DATABASE_PATH`,
/// `QUOTE_BUSY_TIMEOUT_MS` and `QUOTE_ALLOCATION_ATTEMPTS`.
pub fn core_config_from_env_values(
    database_path: Option<String>,
    busy_timeout: Option<String>,
    allocation_attempts: Option<String>,
) -> QuoteResult<CoreConfig> {
    CoreConfig::new(
        database_path_from_env_value(database_path),
        busy_timeout_from_env_value(busy_timeout)?,
        allocation_attempts_from_env_value(allocation_attempts)?,
    )
}

/// Parse a busy timeout in milliseconds from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default timeout.
pub fn busy_timeout_from_env_value(value: Option<String>) -> QuoteResult<Duration> {
    let millis = parse_optional_number(value, "QUOTE_BUSY_TIMEOUT_MS")?
        .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);
    Ok(Duration::from_millis(millis))
}

/// Parse the allocation attempt budget from an optional string value.
pub fn allocation_attempts_from_env_value(value: Option<String>) -> QuoteResult<u32> {
    let attempts = parse_optional_number(value, "QUOTE_ALLOCATION_ATTEMPTS")?
        .unwrap_or(u64::from(DEFAULT_ALLOCATION_ATTEMPTS));
    u32::try_from(attempts).map_err(|_| {
        QuoteError::InvalidInput(format!(
            "QUOTE_ALLOCATION_ATTEMPTS is out of range: {attempts}"
        ))
    })
}

fn parse_optional_number(value: Option<String>, name: &str) -> QuoteResult<Option<u64>> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<u64>()
                .map_err(|_| QuoteError::InvalidInput(format!("{name} is not a number: {v}")))
        })
        .transpose()
}
