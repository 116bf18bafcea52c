//! HTTP transport with a before-send authorization hook
//!
//! Defines the `Transport` trait the account crates issue requests through,
//! and the `AuthMiddleware` hook a credential registry installs so every
//! outgoing request picks up its `Authorization` header without call sites
//! threading credentials around. `HttpTransport` is the reqwest-backed
//! implementation used by the agent binary and the integration tests.
//!
//! Requests that must not carry credentials (token refresh, revoke,
//! reachability probes) run inside `without_auth`, which suspends the hook for
//! the current task only and restores it on every exit path.

pub mod error;
pub mod hook;
pub mod http;

pub use error::{Error, Result};
pub use hook::{auth_suspended, without_auth};
pub use http::{HeaderInjection, HttpTransport, TransportConfig};

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;

/// Boxed future used by the dyn-compatible traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A complete HTTP response: status, headers and the buffered body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Body as (lossy) UTF-8 text, for diagnostics.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Method, extra headers and optional body for `Transport::fetch`.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl FetchOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn head() -> Self {
        Self {
            method: Method::HEAD,
            ..Self::default()
        }
    }

    /// GET with `Accept: */*`, the shape used for JSON and file downloads.
    pub fn accept_any() -> Self {
        let mut options = Self::default();
        options
            .headers
            .insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        options
    }
}

/// Supplies the `Authorization` header value for an outgoing request.
///
/// The transport calls this before sending every request that is not running
/// under `without_auth`. Returning `None` sends the request without
/// credentials. Implementations may perform network I/O (e.g. a token refresh);
/// any request they issue themselves must go through `without_auth`.
pub trait AuthMiddleware: Send + Sync {
    fn authorization<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Option<HeaderValue>>;
}

/// The HTTP collaborator the account crates issue requests through.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Transport>`), so tests can substitute their own transport.
pub trait Transport: Send + Sync {
    /// Issue a request and buffer the whole response.
    fn fetch<'a>(&'a self, url: &'a str, options: FetchOptions)
    -> BoxFuture<'a, Result<HttpResponse>>;

    /// POST an `application/x-www-form-urlencoded` body.
    fn post_form<'a>(
        &'a self,
        url: &'a str,
        form: &'a [(&'a str, &'a str)],
    ) -> BoxFuture<'a, Result<HttpResponse>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_covers_2xx_only() {
        let response = |status| HttpResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(302).is_success());
        assert!(!response(400).is_success());
        assert!(!response(500).is_success());
    }

    #[test]
    fn json_decode_reports_decode_error() {
        let response = HttpResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"<html>oops</html>"),
        };
        let result = response.json::<serde_json::Value>();
        assert!(matches!(result, Err(Error::Decode(_))));
        assert_eq!(response.text(), "<html>oops</html>");
    }

    #[test]
    fn accept_any_sets_accept_header() {
        let options = FetchOptions::accept_any();
        assert_eq!(options.method, Method::GET);
        assert_eq!(options.headers.get("accept").unwrap(), "*/*");
        assert_eq!(FetchOptions::head().method, Method::HEAD);
    }
}
