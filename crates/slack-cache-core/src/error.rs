//! Error types for the caching and relevance layer.
//!
//! Construction-time misconfiguration is loud: it surfaces as an [`Error`]
//! from the constructor and is never clamped. Runtime problems inside the
//! cache (a size calculation that fails, a query that cannot be normalized,
//! a pattern that does not compile) are quiet: callers see a miss or a no-op
//! and the error is only logged.
//!
//! ## Error Categories
//!
//! - **Configuration Errors**: invalid limits or TTLs, unreadable config files
//! - **Query Errors**: search queries the parser rejects
//! - **Index Errors**: lexical index failures inside the relevance scorer
//! - **Input Errors**: malformed payloads handed to the service wrappers
//! - **Dependency Errors**: upstream search or ranking failures
//!
//! ```rust
//! use slack_cache_core::{BoundedCache, BoundedCacheConfig, Error};
//!
//! let config = BoundedCacheConfig { max: 0, ..BoundedCacheConfig::default() };
//! match BoundedCache::<String, String>::new(config) {
//!     Err(e) => assert_eq!(e.category(), "config"),
//!     Ok(_) => unreachable!("a zero-sized cache is rejected"),
//! }
//! ```

use thiserror::Error;

/// The main error type for cache and relevance operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration is invalid or could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// One named cache section of a larger configuration is invalid.
    ///
    /// The display form names the section first so that the caller can tell
    /// which of the service's caches was misconfigured.
    #[error("Invalid {cache} cache configuration: {reason}")]
    InvalidCacheConfig {
        /// Section name (`channels`, `users`, `search`, `files`, `threads`).
        cache: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A raw search query could not be parsed.
    #[error("Query parse error: {0}")]
    QueryParse(String),

    /// The lexical index failed to build or execute a query.
    #[error("Index error: {0}")]
    Index(String),

    /// The configured size calculation rejected a value.
    #[error("Size calculation failed: {0}")]
    SizeCalculation(String),

    /// Caller-supplied input was malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed (config files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The upstream search call failed.
    #[error("Search failed: {0}")]
    Search(String),

    /// Re-ranking failed.
    #[error("Ranking failed: {0}")]
    Ranking(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<tantivy::TantivyError> for Error {
    fn from(err: tantivy::TantivyError) -> Self {
        Self::Index(err.to_string())
    }
}

impl Error {
    /// Shorthand for [`Error::InvalidCacheConfig`].
    pub fn invalid_cache_config(cache: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCacheConfig {
            cache: cache.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error might go away if the operation is retried.
    ///
    /// Only failures of the upstream search and transient I/O count; every
    /// configuration or input problem is permanent.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Search(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Get the error category as a string identifier for logs and metrics.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::InvalidCacheConfig { .. } => "config",
            Self::QueryParse(_) => "query",
            Self::Index(_) => "index",
            Self::SizeCalculation(_) => "size",
            Self::InvalidInput(_) => "input",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Search(_) => "search",
            Self::Ranking(_) => "ranking",
        }
    }

    /// HTTP-style status used by tagged service results.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) | Self::QueryParse(_) | Self::Serialization(_) => 400,
            Self::Config(_) | Self::InvalidCacheConfig { .. } => 422,
            Self::Search(_) => 502,
            _ => 500,
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io;

    #[test]
    fn test_invalid_cache_config_names_the_section() {
        let err = Error::invalid_cache_config("channels", "max must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Invalid channels cache configuration: max must be greater than 0"
        );
        assert_eq!(err.category(), "config");
        assert_eq!(err.status_code(), 422);
    }

    #[test]
    fn test_recoverability() {
        assert!(Error::Search("upstream 503".into()).is_recoverable());
        assert!(Error::Io(io::Error::new(io::ErrorKind::TimedOut, "slow")).is_recoverable());
        assert!(!Error::Io(io::Error::new(io::ErrorKind::NotFound, "gone")).is_recoverable());
        assert!(!Error::Config("bad".into()).is_recoverable());
        assert!(!Error::QueryParse("unbalanced quote".into()).is_recoverable());
    }

    #[test]
    fn test_conversions() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(Error::from(json_err).category(), "serialization");

        let toml_err = toml::from_str::<toml::Value>("max = ").unwrap_err();
        let err = Error::from(toml_err);
        assert_eq!(err.category(), "config");
        assert_eq!(err.status_code(), 422);

        let io_err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(io_err.category(), "io");
    }

    proptest! {
        #[test]
        fn test_input_error_with_arbitrary_messages(msg in r".{0,200}") {
            let error = Error::InvalidInput(msg.clone());
            prop_assert!(error.to_string().contains(&msg));
            prop_assert_eq!(error.category(), "input");
            prop_assert_eq!(error.status_code(), 400);
            prop_assert!(!error.is_recoverable());
        }
    }
}
