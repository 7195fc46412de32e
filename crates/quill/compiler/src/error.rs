use std::io;
use std::path::PathBuf;

use quill_lang::ImageError;

/// Errors a compiler backend can raise.
///
/// The adapter never propagates these: [`ScriptCompiler::compile`] turns
/// them into a synthetic `QE9999` diagnostic.
///
/// [`ScriptCompiler::compile`]: crate::ScriptCompiler::compile
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Reading or writing a file failed.
    #[error("i/o error at `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The external compiler process could not be started.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The compiled image could not be encoded.
    #[error("image encoding failed: {0}")]
    Image(#[from] ImageError),
}

impl BackendError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
