//! Authorization strategies
//!
//! A strategy turns stored credentials into an `Authorization` header line.
//! `Basic` is a fixed value. `Bearer` owns an access/refresh token pair and
//! renews the access token against the token server when it is about to run
//! out, which is why producing a header is async.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use common::{Secret, unix_now};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use transport::Transport;

use crate::constants::{AUTHORIZATION_HEADER, EXPIRED_SENTINEL, REFRESH_SAFETY_MARGIN_SECS};
use crate::crypto::base64_encode;
use crate::token::{self, RefreshOutcome};

/// Outcome of asking a strategy (or the registry) for credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum Authorization {
    /// No strategy applies to the URL.
    None,
    /// A full header line, e.g. `Authorization: Bearer <token>`.
    Header(String),
    /// The session was rejected by the token server; the user must log in again.
    Expired,
}

impl Authorization {
    fn header(scheme: &str, credential: &str) -> Self {
        Self::Header(format!("{AUTHORIZATION_HEADER}: {scheme} {credential}"))
    }

    /// String form: `""`, the header line, or `"expired"`.
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "",
            Self::Header(line) => line,
            Self::Expired => EXPIRED_SENTINEL,
        }
    }

    /// Header value without the `Authorization: ` name.
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Header(line) => line
                .strip_prefix(AUTHORIZATION_HEADER)
                .and_then(|rest| rest.strip_prefix(": ")),
            _ => None,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("Authorization::None"),
            Self::Header(_) => f.write_str("Authorization::Header([REDACTED])"),
            Self::Expired => f.write_str("Authorization::Expired"),
        }
    }
}

/// HTTP Basic credentials.
#[derive(Clone)]
pub struct BasicAuthStrategy {
    encoded: Secret<String>,
}

impl BasicAuthStrategy {
    /// Wrap an already Base64-encoded `login:password` value.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self {
            encoded: Secret::new(encoded.into()),
        }
    }

    pub fn from_credentials(login: &str, password: &str) -> Self {
        Self::new(base64_encode(format!("{login}:{password}").as_bytes()))
    }

    pub fn header(&self) -> Authorization {
        Authorization::header("Basic", self.encoded.expose())
    }

    pub fn properties(&self) -> HashMap<String, String> {
        HashMap::from([
            ("type".to_owned(), "basic".to_owned()),
            ("credentials".to_owned(), self.encoded.expose().clone()),
        ])
    }
}

impl fmt::Debug for BasicAuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthStrategy")
            .field("encoded", &self.encoded)
            .finish()
    }
}

/// Observable lifecycle of a bearer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Valid,
    Refreshing,
    /// Access token cleared after the server refused a refresh.
    Expired,
}

/// Everything needed to build a `BearerAuthStrategy`.
#[derive(Clone, Default)]
pub struct BearerCredentials {
    pub client_id: String,
    pub token_server: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
    /// Unix seconds of the last successful exchange or refresh. `0` forces a
    /// refresh on first use.
    pub last_refresh: i64,
}

impl fmt::Debug for BearerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerCredentials")
            .field("client_id", &self.client_id)
            .field("token_server", &self.token_server)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("last_refresh", &self.last_refresh)
            .finish()
    }
}

struct BearerState {
    access_token: Secret<String>,
    refresh_token: Secret<String>,
    expires_in: i64,
    last_refresh: i64,
    status: TokenState,
}

impl BearerState {
    fn is_fresh(&self, now: i64) -> bool {
        now - self.last_refresh + REFRESH_SAFETY_MARGIN_SECS < self.expires_in
    }

    fn header(&self) -> Authorization {
        Authorization::header("Bearer", self.access_token.expose())
    }
}

/// OAuth bearer token with refresh-on-demand.
///
/// All mutable state sits behind one async mutex that `header()` holds for the
/// whole refresh, so concurrent callers past expiry queue up behind a single
/// refresh request and then see its result.
pub struct BearerAuthStrategy {
    client_id: String,
    token_server: String,
    transport: Arc<dyn Transport>,
    state: Mutex<BearerState>,
}

impl BearerAuthStrategy {
    pub fn new(credentials: BearerCredentials, transport: Arc<dyn Transport>) -> Self {
        let status = if credentials.access_token.is_empty() {
            TokenState::Expired
        } else {
            TokenState::Valid
        };
        Self {
            client_id: credentials.client_id,
            token_server: credentials.token_server,
            transport,
            state: Mutex::new(BearerState {
                access_token: Secret::new(credentials.access_token),
                refresh_token: Secret::new(credentials.refresh_token),
                expires_in: credentials.expires_in,
                last_refresh: credentials.last_refresh,
                status,
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn token_server(&self) -> &str {
        &self.token_server
    }

    pub async fn state(&self) -> TokenState {
        self.state.lock().await.status
    }

    /// Header for the current access token, refreshing it first if needed.
    ///
    /// A refresh that gets no HTTP response keeps the old token, since the
    /// server may simply be unreachable. A refresh the server refuses ends the
    /// session: the access token is wiped and every later call returns
    /// `Authorization::Expired` without touching the network.
    pub async fn header(&self) -> Authorization {
        let mut state = self.state.lock().await;
        if state.status == TokenState::Expired {
            return Authorization::Expired;
        }
        if state.is_fresh(unix_now()) {
            return state.header();
        }

        state.status = TokenState::Refreshing;
        debug!(client_id = %self.client_id, "access token stale, refreshing");
        let outcome = token::refresh_token(
            self.transport.as_ref(),
            &self.token_server,
            &self.client_id,
            state.refresh_token.expose(),
        )
        .await;

        match outcome {
            RefreshOutcome::Refreshed(response) => {
                if let Some(access) = response.access_token.filter(|t| !t.is_empty()) {
                    state.access_token.replace(access);
                }
                if let Some(refresh) = response.refresh_token.filter(|t| !t.is_empty()) {
                    state.refresh_token.replace(refresh);
                }
                if let Some(expires_in) = response.expires_in {
                    state.expires_in = expires_in;
                }
                state.last_refresh = unix_now();
                state.status = TokenState::Valid;
                metrics::counter!("auth_token_refresh_total", "outcome" => "refreshed").increment(1);
                info!(client_id = %self.client_id, expires_in = state.expires_in, "access token refreshed");
                state.header()
            }
            RefreshOutcome::Unreachable(e) => {
                state.status = TokenState::Valid;
                metrics::counter!("auth_token_refresh_total", "outcome" => "transient").increment(1);
                warn!(client_id = %self.client_id, error = %e, "token server unreachable, keeping current token");
                state.header()
            }
            RefreshOutcome::Rejected(reason) => {
                state.access_token.clear();
                state.status = TokenState::Expired;
                metrics::counter!("auth_token_refresh_total", "outcome" => "expired").increment(1);
                warn!(client_id = %self.client_id, %reason, "token refresh rejected, session expired");
                Authorization::Expired
            }
        }
    }

    /// Snapshot of the strategy's fields, keyed the way they are persisted.
    pub async fn properties(&self) -> HashMap<String, String> {
        let state = self.state.lock().await;
        HashMap::from([
            ("type".to_owned(), "bearer".to_owned()),
            ("clientId".to_owned(), self.client_id.clone()),
            ("accessToken".to_owned(), state.access_token.expose().clone()),
            ("refreshToken".to_owned(), state.refresh_token.expose().clone()),
            ("tokenServer".to_owned(), self.token_server.clone()),
            ("expiresIn".to_owned(), state.expires_in.to_string()),
        ])
    }
}

impl fmt::Debug for BearerAuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuthStrategy")
            .field("client_id", &self.client_id)
            .field("token_server", &self.token_server)
            .finish_non_exhaustive()
    }
}

/// The closed set of strategies the registry can hold.
#[derive(Debug)]
pub enum AuthStrategy {
    Basic(BasicAuthStrategy),
    Bearer(BearerAuthStrategy),
}

impl AuthStrategy {
    pub async fn header(&self) -> Authorization {
        match self {
            Self::Basic(basic) => basic.header(),
            Self::Bearer(bearer) => bearer.header().await,
        }
    }

    pub async fn properties(&self) -> HashMap<String, String> {
        match self {
            Self::Basic(basic) => basic.properties(),
            Self::Bearer(bearer) => bearer.properties().await,
        }
    }

    pub fn as_bearer(&self) -> Option<&BearerAuthStrategy> {
        match self {
            Self::Bearer(bearer) => Some(bearer),
            Self::Basic(_) => None,
        }
    }
}

impl From<BasicAuthStrategy> for AuthStrategy {
    fn from(strategy: BasicAuthStrategy) -> Self {
        Self::Basic(strategy)
    }
}

impl From<BearerAuthStrategy> for AuthStrategy {
    fn from(strategy: BearerAuthStrategy) -> Self {
        Self::Bearer(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::transport;
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bearer(token_server: &str, last_refresh: i64) -> BearerAuthStrategy {
        BearerAuthStrategy::new(
            BearerCredentials {
                client_id: "abc".into(),
                token_server: token_server.into(),
                access_token: "A1".into(),
                refresh_token: "R1".into(),
                expires_in: 3600,
                last_refresh,
            },
            transport(),
        )
    }

    #[test]
    fn authorization_string_forms() {
        assert_eq!(Authorization::None.as_str(), "");
        assert_eq!(Authorization::Expired.to_string(), "expired");
        let header = Authorization::header("Bearer", "A1");
        assert_eq!(header.as_str(), "Authorization: Bearer A1");
        assert_eq!(header.value(), Some("Bearer A1"));
        assert_eq!(Authorization::Expired.value(), None);
        assert!(!format!("{header:?}").contains("A1"));
    }

    #[test]
    fn basic_from_credentials_encodes_login_and_password() {
        let basic = BasicAuthStrategy::from_credentials("user", "pass");
        assert_eq!(basic.header().as_str(), "Authorization: Basic dXNlcjpwYXNz");
        let props = basic.properties();
        assert_eq!(props["type"], "basic");
        assert_eq!(props["credentials"], "dXNlcjpwYXNz");
        assert!(!format!("{basic:?}").contains("dXNlcjpwYXNz"));
    }

    #[tokio::test]
    async fn fresh_token_needs_no_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let strategy = bearer(&format!("{}/token", server.uri()), unix_now());
        for _ in 0..3 {
            assert_eq!(strategy.header().await.as_str(), "Authorization: Bearer A1");
        }
        assert_eq!(strategy.state().await, TokenState::Valid);
    }

    #[tokio::test]
    async fn token_inside_safety_margin_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string("grant_type=refresh_token&client_id=abc&refresh_token=R1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A2", "refresh_token": "R2", "expires_in": 600
            })))
            .expect(1)
            .mount(&server)
            .await;

        // 3597 seconds elapsed: 3 seconds left, inside the 5 second margin.
        let strategy = bearer(&format!("{}/token", server.uri()), unix_now() - 3597);
        assert_eq!(strategy.header().await.as_str(), "Authorization: Bearer A2");
        assert_eq!(strategy.header().await.as_str(), "Authorization: Bearer A2");

        let props = strategy.properties().await;
        assert_eq!(props["refreshToken"], "R2");
        assert_eq!(props["expiresIn"], "600");
    }

    #[tokio::test]
    async fn refresh_keeps_previous_values_for_missing_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "A2"})),
            )
            .mount(&server)
            .await;

        let strategy = bearer(&format!("{}/token", server.uri()), 0);
        assert_eq!(strategy.header().await.as_str(), "Authorization: Bearer A2");
        let props = strategy.properties().await;
        assert_eq!(props["refreshToken"], "R1");
        assert_eq!(props["expiresIn"], "3600");
    }

    #[tokio::test]
    async fn rejected_refresh_expires_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let strategy = bearer(&format!("{}/token", server.uri()), 0);
        assert_eq!(strategy.header().await, Authorization::Expired);
        assert_eq!(strategy.state().await, TokenState::Expired);
        assert_eq!(strategy.properties().await["accessToken"], "");

        // No second refresh attempt once expired.
        assert_eq!(strategy.header().await.as_str(), "expired");
    }

    #[tokio::test]
    async fn error_field_in_success_body_expires_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "invalid_grant", "access_token": "ignored"
            })))
            .mount(&server)
            .await;

        let strategy = bearer(&format!("{}/token", server.uri()), 0);
        assert!(strategy.header().await.is_expired());
    }

    #[tokio::test]
    async fn unreachable_token_server_keeps_last_header() {
        let strategy = bearer("http://127.0.0.1:1/token", 0);
        assert_eq!(strategy.header().await.as_str(), "Authorization: Bearer A1");
        assert_eq!(strategy.state().await, TokenState::Valid);
    }

    #[tokio::test]
    async fn restored_strategy_without_access_token_is_expired() {
        let strategy = BearerAuthStrategy::new(
            BearerCredentials {
                client_id: "abc".into(),
                token_server: "http://127.0.0.1:1/token".into(),
                refresh_token: "R1".into(),
                ..BearerCredentials::default()
            },
            transport(),
        );
        assert_eq!(strategy.state().await, TokenState::Expired);
        assert!(strategy.header().await.is_expired());
    }

    #[tokio::test]
    async fn bearer_properties_and_debug() {
        let strategy = bearer("https://auth.example.com/token", 0);
        let props = strategy.properties().await;
        assert_eq!(props["type"], "bearer");
        assert_eq!(props["clientId"], "abc");
        assert_eq!(props["tokenServer"], "https://auth.example.com/token");
        assert_eq!(props["accessToken"], "A1");
        let debug = format!("{strategy:?}");
        assert!(!debug.contains("A1"));
        assert!(!debug.contains("R1"));
    }
}
