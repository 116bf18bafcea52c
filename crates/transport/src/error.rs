//! Transport errors
//!
//! Every variant means the request produced no HTTP response. A response with
//! an error status is not an `Error`: it comes back as an `HttpResponse` so the
//! caller can tell "server said no" apart from "server unreachable".

/// Errors from issuing a request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("transport setup failed: {0}")]
    Setup(String),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::Connect(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}
