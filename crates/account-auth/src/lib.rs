//! Account authentication
//!
//! Attaches credentials to outbound requests without threading them through
//! call sites. Strategies (`Basic`, `Bearer`) are registered in an `AuthStore`
//! under URL prefixes; the store is installed as the transport's authorization
//! hook and resolves the header for every request. Bearer strategies renew
//! their access token on demand against the token server.
//!
//! Login completion goes through `token::exchange_code` with an optional PKCE
//! verifier from `pkce`.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod pkce;
pub mod store;
pub mod strategy;
pub mod token;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use store::{AuthRecord, AuthStore};
pub use strategy::{
    AuthStrategy, Authorization, BasicAuthStrategy, BearerAuthStrategy, BearerCredentials,
    TokenState,
};
pub use token::{CodeExchange, RefreshOutcome, TokenResponse, exchange_and_register, exchange_code};
