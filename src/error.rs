//! Error taxonomy of the snapshot engine.
//!
//! Lifecycle operations stop at the first failing step and return its cause;
//! nothing is rolled back. The `Io` variant always carries a short context
//! naming the step and the path it touched.

use std::io;
use std::path::Path;

use thiserror::Error;

/// Result type used throughout fsnap.
pub type Result<T> = std::result::Result<T, SnapError>;

#[derive(Error, Debug)]
pub enum SnapError {
    /// Chain deeper than the per-handle layer capacity.
    #[error("chain at {path} exceeds the maximum depth of {max} layers")]
    ResourceExhausted { path: String, max: usize },

    /// Named layer (or file) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Reserved or malformed snapshot name.
    #[error("invalid snapshot name '{0}'")]
    InvalidName(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// No layer covers a byte that lies below the current file size.
    #[error("inconsistent chain at {path}: no layer covers offset {offset}")]
    InconsistentChain { path: String, offset: u64 },

    /// Index file that cannot be decoded.
    #[error("corrupt index {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("read-only: {0}")]
    ReadOnly(String),

    /// Operation does not apply to the file in its current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl SnapError {
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    pub fn inconsistent(path: &Path, offset: u64) -> Self {
        Self::InconsistentChain {
            path: path.display().to_string(),
            offset,
        }
    }

    /// Underlying io::ErrorKind, if this is an I/O failure.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

impl From<io::Error> for SnapError {
    fn from(source: io::Error) -> Self {
        Self::Io {
            context: "io".to_string(),
            source,
        }
    }
}

/// `with_context` for plain io results, so call sites read like anyhow ones.
pub trait IoContext<T> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| SnapError::Io {
            context: f().into(),
            source,
        })
    }
}
