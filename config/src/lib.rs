//! Configuration loading for the Stencil validation server.
//!
//! The config file is TOML with three optional sections:
//!
//! ```toml
//! [layout]
//! manifest_file = "package.json"
//! marker_key = "accordproject"
//! logic_dir = "lib"
//!
//! [cache]
//! max_roots = 16
//!
//! [session]
//! revalidate_open_documents = false
//! ```
//!
//! Every section and key falls back to its default. Values are validated
//! while parsing; an invalid layout is a [`ConfigError::Parse`].

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use stencil_types::{CacheSettings, PackageLayout, SessionSettings};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "STENCIL_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StencilConfig {
    pub layout: PackageLayout,
    pub cache: CacheSettings,
    pub session: SessionSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl StencilConfig {
    /// Load the config from its resolved location.
    ///
    /// Returns `Ok(None)` when no config file exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    /// Load the config from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        match toml::from_str(content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded config");
                Ok(config)
            }
            Err(source) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, source);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

/// `$STENCIL_CONFIG` when set and non-empty, else `~/.stencil/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    match env::var_os(CONFIG_PATH_ENV) {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => dirs::home_dir().map(|home| home.join(".stencil").join("config.toml")),
    }
}
