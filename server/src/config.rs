use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use reprice_core::DEFAULT_CHUNK_SIZE;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";
pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

const HOME_ENV_VAR: &str = "REPRICE_HOME";
const DEFAULT_HOME_DIR: &str = ".reprice";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("cannot determine the state directory; set REPRICE_HOME or pass --home")]
    NoHome,
}

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Directory holding the SQLite state database.
    pub home: PathBuf,
    pub recalculation: RecalculationSettings,
    pub jobs: JobsSettings,
    pub operators: Vec<OperatorConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecalculationSettings {
    pub chunk_size: usize,
}

impl Default for RecalculationSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsSettings {
    pub default_list_limit: usize,
    pub max_list_limit: usize,
}

impl Default for JobsSettings {
    fn default() -> Self {
        Self {
            default_list_limit: DEFAULT_LIST_LIMIT,
            max_list_limit: MAX_LIST_LIMIT,
        }
    }
}

impl JobsSettings {
    /// Apply the default and clamp a requested page size.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_list_limit)
            .clamp(1, self.max_list_limit)
    }
}

/// An operator allowed to call the HTTP API.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorConfig {
    pub user_id: String,
    pub token: String,
}

impl std::fmt::Debug for OperatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorConfig")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<SocketAddr>,
    pub home: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    listen: Option<SocketAddr>,
    home: Option<PathBuf>,
    #[serde(default)]
    recalculation: RecalculationSettings,
    #[serde(default)]
    jobs: JobsSettings,
    #[serde(default)]
    operators: Vec<OperatorConfig>,
}

impl ServerConfig {
    /// Load `path` (or built-in defaults when `None`), apply `overrides`,
    /// and validate the result.
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let contents = match path {
            Some(path) => std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?,
            None => String::new(),
        };
        Self::from_toml_str(&contents, overrides)
    }

    pub fn from_toml_str(contents: &str, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let parsed: ConfigToml = toml::from_str(contents)?;
        let listen = match overrides.listen.or(parsed.listen) {
            Some(listen) => listen,
            None => DEFAULT_LISTEN_ADDR
                .parse()
                .map_err(|err| ConfigError::Invalid(format!("default listen address: {err}")))?,
        };
        let home = match overrides.home.or(parsed.home) {
            Some(home) => home,
            None => default_home()?,
        };
        let config = Self {
            listen,
            home,
            recalculation: parsed.recalculation,
            jobs: parsed.jobs,
            operators: parsed.operators,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.recalculation.chunk_size == 0 {
            return Err(invalid("recalculation.chunk_size must be at least 1"));
        }
        if self.jobs.default_list_limit == 0 || self.jobs.max_list_limit == 0 {
            return Err(invalid("jobs list limits must be at least 1"));
        }
        if self.jobs.default_list_limit > self.jobs.max_list_limit {
            return Err(invalid(
                "jobs.default_list_limit must not exceed jobs.max_list_limit",
            ));
        }
        let mut tokens = HashSet::new();
        for operator in &self.operators {
            if operator.user_id.trim().is_empty() {
                return Err(invalid("operator user_id must not be empty"));
            }
            if operator.token.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "operator {} has an empty token",
                    operator.user_id
                )));
            }
            if !tokens.insert(operator.token.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "operator {} reuses another operator's token",
                    operator.user_id
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

fn default_home() -> Result<PathBuf, ConfigError> {
    if let Some(home) = std::env::var_os(HOME_ENV_VAR)
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_HOME_DIR))
        .ok_or(ConfigError::NoHome)
}
