use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Path of a TOML or JSON config file.
pub const ENV_CONFIG_PATH: &str = "LUMEN_CONFIG_PATH";
/// Inline JSON config.
pub const ENV_CONFIG_JSON: &str = "LUMEN_CONFIG_JSON";
/// Overrides `cache.root`.
pub const ENV_CACHE_DIR: &str = "LUMEN_CACHE_DIR";
/// Overrides `http.timeout`.
pub const ENV_HTTP_TIMEOUT: &str = "LUMEN_HTTP_TIMEOUT";
/// Overrides `http.user_agent`.
pub const ENV_USER_AGENT: &str = "LUMEN_USER_AGENT";

/// Raw configuration as written in a TOML or JSON file. Durations stay as
/// humantime strings until composition.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    /// `[cache]`
    #[serde(default)]
    pub cache: FileCacheConfig,
    /// `[http]`
    #[serde(default)]
    pub http: FileHttpConfig,
    /// `[sources]`
    #[serde(default)]
    pub sources: FileSourcesConfig,
}

/// `[cache]` table.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCacheConfig {
    /// Entry directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

/// `[http]` table.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileHttpConfig {
    /// e.g. `"30s"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Connect timeout, same format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
    /// User-Agent header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// `[sources]` table.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSourcesConfig {
    /// Inline URLs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// URL list file, relative to the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Environment-derived configuration values. Empty variables count as unset.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    /// `$LUMEN_CONFIG_PATH`
    pub config_path: Option<PathBuf>,
    /// `$LUMEN_CONFIG_JSON`
    pub config_json: Option<String>,
    /// `$LUMEN_CACHE_DIR`
    pub cache_dir: Option<PathBuf>,
    /// `$LUMEN_HTTP_TIMEOUT`
    pub http_timeout: Option<String>,
    /// `$LUMEN_USER_AGENT`
    pub user_agent: Option<String>,
}

impl EnvConfig {
    /// Read the process environment.
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read through `lookup`, so tests need not touch the real environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name).filter(|value| !value.trim().is_empty())
        };

        Self {
            config_path: get(ENV_CONFIG_PATH).map(PathBuf::from),
            config_json: get(ENV_CONFIG_JSON),
            cache_dir: get(ENV_CACHE_DIR).map(PathBuf::from),
            http_timeout: get(ENV_HTTP_TIMEOUT),
            user_agent: get(ENV_USER_AGENT),
        }
    }
}
