use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use tracing::debug;

use crate::{
    models::{
        CacheConfig, Config, ConfigMetadata, ConfigSource, HttpConfig,
        SourcesConfig, default_cache_root,
    },
    sources::{ENV_CONFIG_JSON, EnvConfig, FileConfig},
    util::{format_duration, parse_optional_duration},
};

/// Why configuration could not be resolved.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// The `.env` file exists but is malformed.
    #[error("failed to read .env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
    /// The requested config file is not there.
    #[error("config file {path} does not exist")]
    MissingConfig { path: PathBuf },
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML or JSON syntax or shape error.
    #[error("failed to parse config {origin}: {message}")]
    Parse { origin: String, message: String },
    /// A duration field is not humantime.
    #[error("invalid duration for {field}: {value:?}: {source}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    /// A field has an unusable value.
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Overrides for where [`ConfigLoader`] looks.
#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    /// Takes precedence over `$LUMEN_CONFIG_PATH`.
    pub config_path: Option<PathBuf>,
    /// Defaults to `.env` in the working directory and its parents.
    pub env_file: Option<PathBuf>,
}

/// A resolved config plus anything worth telling the user.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    /// The result.
    pub config: Config,
    /// Non-fatal problems, e.g. an overridden file value.
    pub warnings: Vec<String>,
}

/// Resolves a [`Config`] from files and the environment.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    /// Loader with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader with explicit options.
    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    /// Use `path` instead of `$LUMEN_CONFIG_PATH`.
    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    /// Read this `.env` file instead of searching for one.
    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Load `.env`, then resolve configuration from the process environment.
    ///
    /// Evaluation order:
    /// 1) the explicit path, else `$LUMEN_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$LUMEN_CONFIG_JSON` (inline JSON),
    /// 3) built-in defaults,
    ///
    /// with `LUMEN_CACHE_DIR`, `LUMEN_HTTP_TIMEOUT` and `LUMEN_USER_AGENT`
    /// applied on top of whichever was chosen.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Same as [`ConfigLoader::load`] with an explicit environment and no
    /// `.env` handling.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file, source) = self.load_file_config(&env)?;
        debug!(?source, "resolved lumen configuration source");
        self.compose_config(file, env, source)
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(FileConfig, ConfigSource), ConfigLoadError> {
        if let Some(path) = &self.options.config_path {
            let file = load_from_file(path)?;
            return Ok((file, ConfigSource::File(path.clone())));
        }

        if let Some(path) = &env.config_path {
            let file = load_from_file(path)?;
            return Ok((file, ConfigSource::EnvPath(path.clone())));
        }

        if let Some(raw) = &env.config_json {
            let file = parse_json(raw, ENV_CONFIG_JSON)?;
            return Ok((file, ConfigSource::EnvInline));
        }

        Ok((FileConfig::default(), ConfigSource::Default))
    }

    fn compose_config(
        &self,
        file: FileConfig,
        env: EnvConfig,
        source: ConfigSource,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = Vec::new();
        let FileConfig {
            cache: file_cache,
            http: file_http,
            sources: file_sources,
        } = file;

        let cache = CacheConfig {
            root: env
                .cache_dir
                .clone()
                .or(file_cache.root)
                .unwrap_or_else(default_cache_root),
        };
        if cache.root.as_os_str().is_empty() {
            return Err(ConfigLoadError::Invalid {
                field: "cache.root",
                reason: "must not be empty".into(),
            });
        }

        let defaults = HttpConfig::default();
        let timeout = match parse_optional_duration(
            "LUMEN_HTTP_TIMEOUT",
            env.http_timeout.as_deref(),
        )? {
            Some(timeout) => timeout,
            None => parse_optional_duration(
                "http.timeout",
                file_http.timeout.as_deref(),
            )?
            .unwrap_or(defaults.timeout),
        };
        let connect_timeout = parse_optional_duration(
            "http.connect_timeout",
            file_http.connect_timeout.as_deref(),
        )?
        .unwrap_or(defaults.connect_timeout);
        let user_agent = env
            .user_agent
            .clone()
            .or(file_http.user_agent)
            .unwrap_or(defaults.user_agent);

        ensure_positive("http.timeout", timeout)?;
        ensure_positive("http.connect_timeout", connect_timeout)?;
        if user_agent.trim().is_empty() {
            return Err(ConfigLoadError::Invalid {
                field: "http.user_agent",
                reason: "must not be empty".into(),
            });
        }
        if connect_timeout > timeout {
            warnings.push(format!(
                "http.connect_timeout ({}) exceeds http.timeout ({}); the overall timeout wins",
                format_duration(connect_timeout),
                format_duration(timeout)
            ));
        }

        let sources = SourcesConfig {
            urls: file_sources.urls,
            file: file_sources
                .file
                .map(|file| resolve_relative(&source, file)),
        };

        let config = Config {
            cache,
            http: HttpConfig {
                timeout,
                connect_timeout,
                user_agent,
            },
            sources,
            metadata: ConfigMetadata {
                source,
                env_file_loaded: false,
            },
        };

        Ok(ConfigLoad { config, warnings })
    }
}

fn ensure_positive(
    field: &'static str,
    value: Duration,
) -> Result<(), ConfigLoadError> {
    if value.is_zero() {
        return Err(ConfigLoadError::Invalid {
            field,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(())
}

/// Relative url list paths in a config file are relative to that file.
fn resolve_relative(source: &ConfigSource, file: PathBuf) -> PathBuf {
    if file.is_absolute() {
        return file;
    }
    match source {
        ConfigSource::File(config) | ConfigSource::EnvPath(config) => config
            .parent()
            .map(|dir| dir.join(&file))
            .unwrap_or(file),
        ConfigSource::EnvInline | ConfigSource::Default => file,
    }
}

/// Parse a TOML or JSON file, chosen by extension.
pub fn load_from_file(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    if !path.exists() {
        return Err(ConfigLoadError::MissingConfig {
            path: path.to_path_buf(),
        });
    }
    let contents =
        fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let origin = path.display().to_string();

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_json(&contents, &origin),
        Some("toml") | Some("tml") => {
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                origin,
                message: err.to_string(),
            })
        }
        _ => parse_from_str(&contents, &origin),
    }
}

/// Try TOML first, then JSON.
pub fn parse_from_str(
    contents: &str,
    origin: &str,
) -> Result<FileConfig, ConfigLoadError> {
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| {
            ConfigLoadError::Parse {
                origin: origin.to_string(),
                message: format!(
                    "toml error: {toml_err}; json error: {json_err}"
                ),
            }
        })
    })
}

/// Parse inline JSON; `origin` names it in errors.
pub fn parse_json(raw: &str, origin: &str) -> Result<FileConfig, ConfigLoadError> {
    serde_json::from_str(raw).map_err(|err| ConfigLoadError::Parse {
        origin: origin.to_string(),
        message: err.to_string(),
    })
}
