//! PKCE (Proof Key for Code Exchange) per RFC 7636 and the authorization URL
//!
//! One verifier is generated per login attempt and kept only in memory; the
//! authorization URL carries its S256 challenge, and the token exchange sends
//! the verifier itself so the server can check both came from the same party.

use rand::RngExt;
use url::Url;

use crate::crypto::{base64url_encode, hex_encode, sha256};
use crate::error::{Error, Result};

/// Generate a cryptographically random PKCE code verifier.
///
/// 32 random bytes, hex-encoded: 64 characters, inside RFC 7636's 43-128
/// range and made only of unreserved characters.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex_encode(&bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    base64url_encode(&sha256(verifier.as_bytes()))
}

/// Opaque `state` value for CSRF protection, echoed back on the redirect.
pub fn generate_state() -> String {
    uuid::Uuid::new_v4().as_simple().to_string()
}

/// A verifier and its challenge for one login attempt.
#[derive(Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Parameters of the browser-facing authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub auth_endpoint: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
    pub state: &'a str,
    /// S256 challenge; `None` when the provider does not support PKCE.
    pub code_challenge: Option<&'a str>,
}

/// Build the full authorization URL with all required OAuth parameters.
///
/// Parameters are appended to any query the endpoint already carries and are
/// form-encoded.
pub fn build_authorization_url(request: &AuthorizationRequest<'_>) -> Result<String> {
    let mut url = Url::parse(request.auth_endpoint).map_err(|e| {
        Error::InvalidArgument(format!(
            "invalid authorization endpoint {}: {e}",
            request.auth_endpoint
        ))
    })?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", request.client_id)
            .append_pair("redirect_uri", request.redirect_uri)
            .append_pair("scope", request.scope)
            .append_pair("state", request.state);
        if let Some(challenge) = request.code_challenge {
            query
                .append_pair("code_challenge", challenge)
                .append_pair("code_challenge_method", "S256");
        }
    }
    Ok(url.into())
}
