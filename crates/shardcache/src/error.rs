//! Error types for shardcache

use std::fmt;

/// Result type alias for shardcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations
///
/// Misses and over-capacity after eviction are normal outcomes and never
/// show up here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A caller contract was broken: a handle from another cache, a handle
    /// whose entry is gone, a teardown with pinned entries, or a bad config.
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
