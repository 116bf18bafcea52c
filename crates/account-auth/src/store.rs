//! Credential registry keyed by URL prefix
//!
//! Holds one `AuthRecord` per distinct prefix, in registration order. The
//! first record whose prefix starts the request URL wins. `AuthStore` is also
//! the transport's `AuthMiddleware`: installed once at startup, it supplies
//! the `Authorization` header for every outgoing request.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::header::HeaderValue;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use transport::{AuthMiddleware, BoxFuture, Transport};

use crate::constants::ANY_URL;
use crate::error::{Error, Result};
use crate::strategy::{AuthStrategy, Authorization};
use crate::token;

/// A URL prefix and the strategy that authorizes requests under it.
#[derive(Debug, Clone)]
pub struct AuthRecord {
    pub url_prefix: String,
    pub strategy: Arc<AuthStrategy>,
}

/// Thread-safe prefix-to-strategy registry.
pub struct AuthStore {
    records: RwLock<Vec<AuthRecord>>,
    transport: Arc<dyn Transport>,
}

impl AuthStore {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            transport,
        }
    }

    /// Transport used for token requests issued on behalf of this registry.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Register `strategy` under every URL in `urls`.
    ///
    /// All records share one strategy instance. A record with an identical
    /// prefix is replaced where it stands, keeping its position.
    pub async fn register<S: AsRef<str>>(
        &self,
        urls: &[S],
        strategy: impl Into<AuthStrategy>,
    ) -> Result<Arc<AuthStrategy>> {
        if urls.is_empty() {
            return Err(Error::InvalidArgument("no URL prefix given".into()));
        }
        if urls.iter().any(|u| u.as_ref().is_empty()) {
            return Err(Error::InvalidArgument("empty URL prefix".into()));
        }

        let strategy = Arc::new(strategy.into());
        let mut records = self.records.write().await;
        for url in urls {
            let url = url.as_ref();
            let record = AuthRecord {
                url_prefix: url.to_owned(),
                strategy: Arc::clone(&strategy),
            };
            match records.iter_mut().find(|r| r.url_prefix == url) {
                Some(existing) => {
                    *existing = record;
                    info!(prefix = %url, "replaced auth strategy");
                }
                None => {
                    records.push(record);
                    info!(prefix = %url, "registered auth strategy");
                }
            }
        }
        Ok(strategy)
    }

    /// Remove the record for exactly `url_prefix`.
    ///
    /// With a `logout_url`, a bearer strategy's refresh token is revoked first.
    /// Revocation is best effort: failures are logged and removal proceeds.
    /// Returns whether a record was removed.
    pub async fn unregister(&self, url_prefix: &str, logout_url: Option<&str>) -> bool {
        let removed = {
            let mut records = self.records.write().await;
            records
                .iter()
                .position(|r| r.url_prefix == url_prefix)
                .map(|index| records.remove(index))
        };
        let Some(record) = removed else {
            debug!(prefix = %url_prefix, "no auth strategy to unregister");
            return false;
        };

        if let (Some(logout_url), Some(bearer)) = (logout_url, record.strategy.as_bearer()) {
            let properties = bearer.properties().await;
            let refresh_token = properties
                .get("refreshToken")
                .map(String::as_str)
                .unwrap_or_default();
            if let Err(e) = token::revoke(
                self.transport.as_ref(),
                logout_url,
                bearer.client_id(),
                refresh_token,
            )
            .await
            {
                warn!(prefix = %url_prefix, error = %e, "token revoke failed");
            }
        }
        info!(prefix = %url_prefix, "unregistered auth strategy");
        true
    }

    /// Strategy that applies to `url`, cloned out of the registry.
    pub async fn strategy_for(&self, url: &str) -> Option<Arc<AuthStrategy>> {
        let records = self.records.read().await;
        let record = if url == ANY_URL {
            records.first()
        } else {
            records.iter().find(|r| url.starts_with(&r.url_prefix))
        };
        record.map(|r| Arc::clone(&r.strategy))
    }

    /// Header for `url`, or `Authorization::None` when no prefix matches.
    ///
    /// The registry lock is released before the strategy runs, so a refresh
    /// never blocks lookups for other URLs.
    pub async fn resolve_header(&self, url: &str) -> Authorization {
        match self.strategy_for(url).await {
            Some(strategy) => strategy.header().await,
            None => Authorization::None,
        }
    }

    /// Fields of the strategy matching `url`; empty when nothing matches.
    pub async fn properties_for(&self, url: &str) -> HashMap<String, String> {
        match self.strategy_for(url).await {
            Some(strategy) => strategy.properties().await,
            None => HashMap::new(),
        }
    }

    /// Registered prefixes in match order.
    pub async fn prefixes(&self) -> Vec<String> {
        let records = self.records.read().await;
        records.iter().map(|r| r.url_prefix.clone()).collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl AuthMiddleware for AuthStore {
    fn authorization<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Option<HeaderValue>> {
        Box::pin(async move {
            let authorization = self.resolve_header(url).await;
            let value = authorization.value()?;
            match HeaderValue::from_str(value) {
                Ok(mut header) => {
                    header.set_sensitive(true);
                    Some(header)
                }
                Err(e) => {
                    warn!(error = %e, "authorization value is not a valid header");
                    None
                }
            }
        })
    }
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStore").finish_non_exhaustive()
    }
}
