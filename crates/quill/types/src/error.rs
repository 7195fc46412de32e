//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or loading [`ScriptSettings`](crate::ScriptSettings).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configured working directory does not exist.
    #[error("working directory does not exist: {}", .0.display())]
    MissingWorkingDirectory(PathBuf),

    /// The configured working directory exists but is not a directory.
    #[error("working directory is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The settings file could not be read.
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for [`ScriptSettings`](crate::ScriptSettings).
    #[error("invalid settings: {0}")]
    Parse(String),

    /// A restriction entry has an empty name.
    #[error("empty {0} restriction name")]
    EmptyRestriction(&'static str),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
