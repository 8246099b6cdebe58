//! Error types for Lightdance
//!
//! Only setup failures live here. Runtime failures (malformed frames, bad
//! operator input, delivery errors) have their own narrow types in
//! `lightdance-core` so call sites can decide to log and continue.

/// Application-level setup errors
#[derive(thiserror::Error, Debug)]
pub enum LightdanceError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("logging error: {0}")]
    LoggingError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LightdanceError {
    /// Wrap a bind failure with the address that was being bound
    pub fn bind(addr: impl std::fmt::Display, err: std::io::Error) -> Self {
        LightdanceError::NetworkError(format!("failed to bind {}: {}", addr, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_message() {
        let err = LightdanceError::bind(
            "0.0.0.0:5000",
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        );
        assert_eq!(
            err.to_string(),
            "network error: failed to bind 0.0.0.0:5000: address in use"
        );
    }

    #[test]
    fn test_io_error_is_transparent() {
        let err: LightdanceError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.to_string(), "denied");
    }
}
