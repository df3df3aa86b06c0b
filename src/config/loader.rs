//! Locating, reading and checking the clipfetch config file.

use std::path::{Path, PathBuf};

use super::ClipfetchConfig;

/// Config file looked up in the working directory.
const LOCAL_FILE: &str = ".clipfetch.toml";

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// The file parsed but describes a worker setup that cannot run.
    #[error("Invalid config file {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Where the configuration comes from.
#[derive(Debug)]
pub enum ConfigLoader {
    /// `--config <path>`: the file must exist.
    Explicit(PathBuf),
    /// First existing candidate wins; defaults when none exists.
    Search(Vec<PathBuf>),
}

impl ConfigLoader {
    /// Search `./.clipfetch.toml`, then `<config_dir>/clipfetch/config.toml`.
    #[must_use]
    pub fn new() -> Self {
        let mut candidates = vec![PathBuf::from(LOCAL_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("clipfetch").join("config.toml"));
        }
        Self::Search(candidates)
    }

    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self::Explicit(path)
    }

    /// Load and check the configuration.
    ///
    /// A relative `worker.script` is resolved against the directory of the
    /// file it was read from.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing explicit file, and a read, parse or
    /// validation error naming the offending file.
    pub fn load(&self) -> Result<ClipfetchConfig, ConfigError> {
        let path = match self {
            Self::Explicit(path) if !path.is_file() => {
                return Err(ConfigError::NotFound(path.clone()));
            }
            Self::Explicit(path) => path,
            Self::Search(candidates) => match candidates.iter().find(|p| p.is_file()) {
                Some(path) => path,
                None => {
                    tracing::debug!("No config file found, using defaults");
                    return Ok(ClipfetchConfig::default());
                }
            },
        };

        tracing::debug!(path = %path.display(), "Loading config file");
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.clone(),
            source,
        })?;
        let mut config: ClipfetchConfig =
            toml::from_str(&content).map_err(|source| ConfigError::ParseError {
                path: path.clone(),
                source,
            })?;

        if let Some(base) = path.parent() {
            resolve_script(&mut config, base);
        }
        config.validate().map_err(|reason| ConfigError::Invalid {
            path: path.clone(),
            reason,
        })?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_script(config: &mut ClipfetchConfig, base: &Path) {
    if let Some(script) = &config.worker.script {
        if script.is_relative() && !base.as_os_str().is_empty() {
            config.worker.script = Some(base.join(script));
        }
    }
}
