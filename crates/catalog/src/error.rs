//! Error type shared by every catalog operation.

use thiserror::Error;

/// Errors surfaced by catalog operations.
///
/// Per-entry enumeration failures are never surfaced through this type; they
/// are logged and the entry is skipped. Event application likewise swallows
/// errors and falls back to a full rescan.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A URI, mount token, or relative path was malformed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A container index (or other structured input) failed validation.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// An underlying IO or permission failure.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The operation's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl CatalogError {
    pub(crate) fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    pub(crate) fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }
}
