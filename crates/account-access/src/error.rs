//! Error types for account access operations

use std::net::SocketAddr;

/// Errors from login, logout and account refresh.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] account_auth::Error),

    #[error("transport error: {0}")]
    Transport(#[from] transport::Error),

    #[error(transparent)]
    License(#[from] account_license::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings error: {0}")]
    Settings(String),

    #[error("cannot listen for the sign-in redirect on {addr}: {source}")]
    Listener {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("cannot open browser: {0}")]
    Browser(String),

    #[error("sign in failed: {0}")]
    LoginRejected(String),

    #[error("sign in redirect carried an unexpected state")]
    StateMismatch,

    #[error("timed out waiting for sign in")]
    LoginTimeout,

    #[error("account endpoint {0} is unavailable")]
    EndpointUnavailable(String),

    #[error("decode error: {0}")]
    Decode(String),
}

/// Result alias for account access operations.
pub type Result<T> = std::result::Result<T, Error>;
