//! Configuration for lumen hosts.
//!
//! A [`Config`] is resolved from an optional TOML/JSON file, inline JSON in
//! the environment and single-field environment overrides, in that order of
//! increasing precedence. [`Config::loader_options`] turns it into the
//! options `lumen_core::ImageLoader` is built from.

pub mod loader;
pub mod models;
pub mod sources;
pub mod util;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    CacheConfig, Config, ConfigMetadata, ConfigSource, HttpConfig,
    SourcesConfig, default_cache_root, parse_url_list, read_url_list,
};
pub use sources::{EnvConfig, FileConfig};
