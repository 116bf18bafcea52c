//! Error types for license key handling

/// Errors from the public-key cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed public key: {0}")]
    MalformedKey(String),
}

/// Result alias for license operations.
pub type Result<T> = std::result::Result<T, Error>;
