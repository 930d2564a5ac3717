//! Configuration management for GraphMind services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`GRAPHMIND__` prefix, `__` section separator)
//! 2. Config file (`graphmind.toml` by default)
//! 3. Defaults declared on each section type

use serde::de::DeserializeOwned;

use crate::error::GraphmindError;

/// Environment variable prefix shared by every section.
pub const ENV_PREFIX: &str = "GRAPHMIND";

/// Default config file prefix (`graphmind.toml`, `graphmind.json`, ...).
pub const DEFAULT_FILE_PREFIX: &str = "graphmind";

/// Build the layered source for the given file prefix.
pub fn layered(file_prefix: &str) -> Result<config::Config, GraphmindError> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    Ok(cfg)
}

/// Load one section (e.g. `falkordb`, `cache`) from the layered config.
///
/// A missing section yields `T::default()`. A section that is present but
/// malformed is an error, so typos in a config file are not silently ignored.
pub fn load_section<T>(cfg: &config::Config, section: &str) -> Result<T, GraphmindError>
where
    T: DeserializeOwned + Default,
{
    match cfg.get::<T>(section) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => Ok(T::default()),
        Err(e) => Err(GraphmindError::Config(format!("[{section}]: {e}"))),
    }
}
