//! # Configuration
//!
//! Layered settings for a migration run, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a TOML file (`docshift.toml` in the working directory, or an explicit path)
//! 3. environment variables prefixed `DOCSHIFT__`, with `__` between nested keys
//!    (`DOCSHIFT__CHUNK_SIZE=500`, `DOCSHIFT__PROVIDER__KIND=directory`)
//!
//! Command-line flags are applied on top by the binary.
//!
//! ```rust,no_run
//! use docshift::config::MigrationConfig;
//!
//! # fn main() -> docshift::Result<()> {
//! let config = MigrationConfig::load(None)?;
//! assert!(config.chunk_size > 0);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DocshiftError, Result};
use crate::partition::DEFAULT_CHUNK_SIZE;
use crate::provider::ProviderConfig;
use crate::transform::DEFAULT_SCRIPT_PATH;

pub const DEFAULT_CONFIG_FILE: &str = "docshift.toml";
pub const ENV_PREFIX: &str = "DOCSHIFT";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub environment: String,
    /// Database to migrate; usually given on the command line
    pub database_name: Option<String>,
    pub chunk_size: usize,
    pub worker_count: usize,
    /// Pause between spawning workers and the first handshake message
    pub settle_delay_ms: u64,
    /// Requeue a chunk held longer than this; disabled when unset
    pub chunk_timeout_ms: Option<u64>,
    pub ledger_dir: PathBuf,
    pub script_path: PathBuf,
    pub provider: ProviderConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            environment: crate::logging::get_environment(),
            database_name: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            worker_count: 1,
            settle_delay_ms: 100,
            chunk_timeout_ms: None,
            ledger_dir: PathBuf::from("."),
            script_path: PathBuf::from(DEFAULT_SCRIPT_PATH),
            provider: ProviderConfig::Memory,
        }
    }
}

impl MigrationConfig {
    /// Load from the optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map in place of the process environment
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(DocshiftError::configuration(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                config::File::from(path).required(true)
            }
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        debug!(
            environment = %config.environment,
            chunk_size = config.chunk_size,
            worker_count = config.worker_count,
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(DocshiftError::configuration(
                "chunk_size must be greater than 0",
            ));
        }
        if self.worker_count == 0 {
            return Err(DocshiftError::configuration(
                "worker_count must be greater than 0",
            ));
        }
        if self.chunk_timeout_ms == Some(0) {
            return Err(DocshiftError::configuration(
                "chunk_timeout_ms must be greater than 0 when set",
            ));
        }
        if matches!(self.database_name.as_deref(), Some("")) {
            return Err(DocshiftError::configuration(
                "database_name must not be empty",
            ));
        }
        if let ProviderConfig::Directory { path } = &self.provider {
            if path.as_os_str().is_empty() {
                return Err(DocshiftError::configuration(
                    "provider.path must be set for the directory provider",
                ));
            }
        }
        Ok(())
    }

    pub fn database_name(&self) -> Result<&str> {
        self.database_name
            .as_deref()
            .ok_or_else(|| DocshiftError::configuration("no database name given"))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn chunk_timeout(&self) -> Option<Duration> {
        self.chunk_timeout_ms.map(Duration::from_millis)
    }
}
