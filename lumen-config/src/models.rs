use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use directories::ProjectDirs;
use lumen_core::{HttpSettings, LoaderOptions, ResourceId, resource_ids_from_strings};

/// Directory name of the persistent tier inside the platform cache dir.
pub const CACHE_DIR_NAME: &str = "ImageCache";

/// Whole-request HTTP timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Connect timeout when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    /// Nothing was found; built-in defaults.
    #[default]
    Default,
    /// Path handed to the loader directly.
    File(PathBuf),
    /// `$LUMEN_CONFIG_PATH`.
    EnvPath(PathBuf),
    /// `$LUMEN_CONFIG_JSON`.
    EnvInline,
}

/// How a [`Config`] was resolved.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    /// Which source won.
    pub source: ConfigSource,
    /// Whether a `.env` file was read.
    pub env_file_loaded: bool,
}

/// Fully resolved settings for a lumen host.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Persistent tier.
    pub cache: CacheConfig,
    /// Network tier.
    pub http: HttpConfig,
    /// Default URLs to fetch.
    pub sources: SourcesConfig,
    /// Provenance; not serialized.
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Directory of the persistent tier.
    pub fn cache_root(&self) -> &Path {
        &self.cache.root
    }

    /// Options for `lumen_core::ImageLoader::new`.
    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            cache_dir: self.cache.root.clone(),
            http: self.http.to_settings(),
        }
    }

    /// Inline urls first, then the lines of the sources file. Malformed
    /// entries are dropped with a warning.
    pub fn resource_ids(&self) -> anyhow::Result<Vec<ResourceId>> {
        let mut raw = self.sources.urls.clone();
        if let Some(path) = &self.sources.file {
            raw.extend(read_url_list(path)?);
        }
        Ok(resource_ids_from_strings(raw))
    }
}

/// Persistent tier settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry directory; created on first use.
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
        }
    }
}

/// `<platform cache dir>/ImageCache`, falling back to the temp dir when the
/// platform reports no home directory.
pub fn default_cache_root() -> PathBuf {
    ProjectDirs::from("dev", "lumen", "lumen")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("lumen"))
        .join(CACHE_DIR_NAME)
}

/// Network tier settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Connect phase only.
    pub connect_timeout: Duration,
    /// Sent with every request.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: HttpSettings::default().user_agent,
        }
    }
}

impl HttpConfig {
    /// Convert to the transport's settings type.
    pub fn to_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            user_agent: self.user_agent.clone(),
        }
    }
}

/// URLs a host fetches when none are given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcesConfig {
    /// Inline URLs, in order.
    pub urls: Vec<String>,
    /// Newline separated url list; `#` starts a comment line.
    pub file: Option<PathBuf>,
}

/// Read a url list file, skipping blank lines and `#` comments.
pub fn read_url_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read url list {}", path.display()))?;
    Ok(parse_url_list(&contents))
}

/// Trimmed non-empty lines that are not `#` comments.
pub fn parse_url_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
