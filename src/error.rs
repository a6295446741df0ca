//! Error type for graph construction and FS-provider transport failures.
//!
//! Per-query filesystem failures (ENOENT, ENOTDIR, ...) are never
//! surfaced here — they are absorbed into node state bits (see
//! [`crate::bits`]) and the affected query simply returns an empty
//! result. [`PathGraphError`] only covers the handful of things that
//! can legitimately fail at the API boundary: malformed construction
//! arguments and FS-provider transport errors that are not themselves
//! a `errno`-shaped filesystem error.

use std::fmt;

/// Errors that can escape the graph's public API.
#[derive(Debug)]
pub enum PathGraphError {
    /// The string passed as the starting `cwd` could not be parsed by
    /// the selected platform profile.
    InvalidCwd(String),
    /// The injected [`crate::fsprovider::FsProvider`] returned an I/O
    /// error that does not correspond to a recognized filesystem
    /// errno (see [`crate::fsprovider::FsErrorKind`]); such errors are
    /// not absorbed into node state and are reported to whichever
    /// caller triggered them.
    Provider(std::io::Error),
}

impl fmt::Display for PathGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathGraphError::InvalidCwd(s) => write!(f, "invalid cwd: {s:?}"),
            PathGraphError::Provider(e) => write!(f, "fs provider error: {e}"),
        }
    }
}

impl std::error::Error for PathGraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PathGraphError::Provider(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PathGraphError {
    fn from(e: std::io::Error) -> Self {
        PathGraphError::Provider(e)
    }
}

pub type Result<T> = std::result::Result<T, PathGraphError>;
