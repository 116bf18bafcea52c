//! OAuth token endpoint interactions
//!
//! Three requests hit the token server, all form-encoded and all sent with the
//! authorization hook suspended so the registry is never consulted for the
//! credential that is being obtained:
//! 1. Authorization code exchange (login completion)
//! 2. Refresh-token grant (issued by `BearerAuthStrategy::header`)
//! 3. Revoke on logout (best effort)

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use tracing::{info, instrument};
use transport::{HttpResponse, Transport, without_auth};

use crate::error::{Error, Result};
use crate::store::AuthStore;
use crate::strategy::{AuthStrategy, BearerAuthStrategy, BearerCredentials};

/// Response body of the token endpoint for both exchange and refresh.
///
/// Every field is optional: refresh responses may omit the refresh token or
/// lifetime, in which case the previous values stay in force.
#[derive(Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds the access token stays valid. Some servers send it as a string.
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenResponse {
    /// Server-reported failure, if the body carries a non-empty `error`.
    pub fn rejection(&self) -> Option<String> {
        let error = self.error.as_deref().filter(|e| !e.is_empty())?;
        Some(match self.error_description.as_deref() {
            Some(description) if !description.is_empty() => format!("{error}: {description}"),
            _ => error.to_owned(),
        })
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .finish()
    }
}

fn lenient_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Inputs of the authorization-code grant.
#[derive(Debug, Clone)]
pub struct CodeExchange<'a> {
    pub token_server: &'a str,
    pub client_id: &'a str,
    pub code: &'a str,
    pub redirect_uri: &'a str,
    /// PKCE verifier matching the challenge sent in the authorization URL.
    pub code_verifier: Option<&'a str>,
}

/// Result of a refresh-token grant.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The server issued new tokens.
    Refreshed(TokenResponse),
    /// No HTTP response was received. The session is still good.
    Unreachable(transport::Error),
    /// The server answered and refused, or answered with garbage.
    Rejected(String),
}

/// Describe a failed response, preferring the server's own explanation.
fn failure_reason(response: &HttpResponse) -> String {
    let described = response
        .json::<TokenResponse>()
        .ok()
        .and_then(|token| token.rejection());
    match described {
        Some(reason) => format!("token endpoint returned {}: {reason}", response.status),
        None => format!("token endpoint returned {}: {}", response.status, response.text()),
    }
}

/// Exchange an authorization code for tokens.
///
/// On success the returned strategy is stamped with the current time, so its
/// first `header()` call needs no network. Nothing is registered here.
#[instrument(skip_all, fields(token_server = %exchange.token_server))]
pub async fn exchange_code(
    transport: &Arc<dyn Transport>,
    exchange: &CodeExchange<'_>,
) -> Result<BearerAuthStrategy> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", exchange.code),
        ("redirect_uri", exchange.redirect_uri),
        ("client_id", exchange.client_id),
    ];
    if let Some(verifier) = exchange.code_verifier {
        form.push(("code_verifier", verifier));
    }

    let response = without_auth(transport.post_form(exchange.token_server, &form))
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    if !response.is_success() {
        return Err(Error::TokenExchange(failure_reason(&response)));
    }

    let token: TokenResponse = response
        .json()
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))?;
    if let Some(reason) = token.rejection() {
        return Err(Error::TokenExchange(reason));
    }
    let access_token = token
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::TokenExchange("token response has no access_token".into()))?;

    info!(expires_in = ?token.expires_in, "authorization code exchanged");
    Ok(BearerAuthStrategy::new(
        BearerCredentials {
            client_id: exchange.client_id.to_owned(),
            token_server: exchange.token_server.to_owned(),
            access_token,
            refresh_token: token.refresh_token.unwrap_or_default(),
            expires_in: token.expires_in.unwrap_or(0),
            last_refresh: common::unix_now(),
        },
        Arc::clone(transport),
    ))
}

/// Exchange a code and register the resulting strategy under every URL.
pub async fn exchange_and_register<S: AsRef<str>>(
    store: &AuthStore,
    urls: &[S],
    exchange: &CodeExchange<'_>,
) -> Result<Arc<AuthStrategy>> {
    if urls.is_empty() {
        return Err(Error::InvalidArgument("no URL to register the token under".into()));
    }
    let strategy = exchange_code(store.transport(), exchange).await?;
    store.register(urls, strategy).await
}

/// Run the refresh-token grant.
#[instrument(skip_all, fields(token_server = %token_server))]
pub async fn refresh_token(
    transport: &dyn Transport,
    token_server: &str,
    client_id: &str,
    refresh_token: &str,
) -> RefreshOutcome {
    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", client_id),
        ("refresh_token", refresh_token),
    ];
    let response = match without_auth(transport.post_form(token_server, &form)).await {
        Ok(response) => response,
        Err(e) => return RefreshOutcome::Unreachable(e),
    };
    if !response.is_success() {
        return RefreshOutcome::Rejected(failure_reason(&response));
    }
    match response.json::<TokenResponse>() {
        Ok(token) => match token.rejection() {
            Some(reason) => RefreshOutcome::Rejected(reason),
            None => RefreshOutcome::Refreshed(token),
        },
        Err(e) => RefreshOutcome::Rejected(format!("invalid refresh response: {e}")),
    }
}

/// Ask the server to revoke a refresh token.
pub async fn revoke(
    transport: &dyn Transport,
    logout_url: &str,
    client_id: &str,
    refresh_token: &str,
) -> Result<()> {
    let form = [("client_id", client_id), ("refresh_token", refresh_token)];
    let response = without_auth(transport.post_form(logout_url, &form)).await?;
    if !response.is_success() {
        return Err(Error::Http(format!(
            "revoke returned {}: {}",
            response.status,
            response.text()
        )));
    }
    Ok(())
}
