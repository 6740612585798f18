//! Unified error types for edgeproxy.
//!
//! Most recoverable conditions (unreadable indices, missing blobs, URL parse
//! failures) are handled in place with a warning rather than surfaced here;
//! this enum covers the failures callers genuinely have to react to.

/// Unified error type for the edgeproxy core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Cache directory or blob I/O failed.
    #[error("CACHE_IO: {0}")]
    Io(#[from] std::io::Error),

    /// Index serialization failed.
    #[error("INDEX_ENCODE: {0}")]
    IndexEncode(#[from] serde_json::Error),

    /// Configuration loading or validation failed.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] crate::config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(err.to_string().contains("CACHE_IO"));
        assert!(err.to_string().contains("gone"));
    }
}
