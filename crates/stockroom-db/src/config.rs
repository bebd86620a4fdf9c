//! # Database Configuration
//!
//! Pool settings for the Stockroom database, loadable from a TOML file and
//! overridable from the environment.
//!
//! ## Resolution Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Defaults (DbConfig::default)                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  2. stockroom.toml (explicit path, or platform config dir)              │
//! │     • macOS: ~/Library/Application Support/com.stockroom.stockroom/     │
//! │     • Linux: ~/.config/stockroom/                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  3. Environment                                                         │
//! │     • STOCKROOM_DB_PATH          → database_path                        │
//! │     • STOCKROOM_MAX_CONNECTIONS  → max_connections                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// File name looked up in the platform config directory.
const CONFIG_FILE_NAME: &str = "stockroom.toml";

/// Path used to request a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/stockroom.db")
///     .max_connections(5)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Path to the SQLite database file, or `:memory:`.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection acquire timeout in seconds.
    /// Default: 30
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds before a pooled connection is closed.
    /// `None` keeps connections forever (required for in-memory databases).
    pub idle_timeout_secs: Option<u64>,

    /// Enforce foreign keys (SQLite has them off by default).
    pub foreign_keys: bool,

    /// Use WAL journaling (ignored for in-memory databases).
    pub wal: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig::new(default_database_path())
    }
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    ///
    /// ## Arguments
    /// * `path` - Path to the SQLite database file. Will be created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: Some(600),
            foreign_keys: true,
            wal: true,
        }
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// ## Usage
    /// ```rust,ignore
    /// let conn = Connection::open(&DbConfig::in_memory()).await?;
    /// // Database is isolated, perfect for tests
    /// ```
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(IN_MEMORY_PATH),
            max_connections: 1, // In-memory requires single connection
            min_connections: 1,
            connect_timeout_secs: 5,
            idle_timeout_secs: None,
            foreign_keys: true,
            wal: false,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection acquire timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs();
        self
    }

    /// Sets whether foreign keys are enforced.
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Whether this configuration names the in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database_path == Path::new(IN_MEMORY_PATH)
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout_duration(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    /// Loads configuration from a TOML file, then applies environment overrides.
    ///
    /// A missing file is not an error: defaults are used instead. With
    /// `config_path == None` the platform config directory is searched.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = config_path.or_else(default_config_path);

        let mut config = match path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading database config");
                let contents =
                    std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                        path: path.clone(),
                        source,
                    })?;
                toml::from_str(&contents)?
            }
            _ => DbConfig::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `STOCKROOM_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = env::var("STOCKROOM_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }

        if let Ok(max) = env::var("STOCKROOM_MAX_CONNECTIONS") {
            self.max_connections = max
                .parse()
                .map_err(|_| ConfigError::InvalidValue("STOCKROOM_MAX_CONNECTIONS".to_string()))?;
        }

        Ok(())
    }

    /// Checks pool bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("max_connections".to_string()));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue("min_connections".to_string()));
        }
        if self.is_in_memory() && self.max_connections != 1 {
            return Err(ConfigError::InvalidValue(
                "max_connections (in-memory databases need exactly 1)".to_string(),
            ));
        }
        Ok(())
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "stockroom", "stockroom")
}

/// `stockroom.toml` in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// `stockroom.db` in the platform data directory, or the working directory.
pub fn default_database_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("stockroom.db"))
        .unwrap_or_else(|| PathBuf::from("stockroom.db"))
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {0}")]
    InvalidValue(String),
}
