//! Loopback listener that receives the authorization redirect
//!
//! The identity provider redirects the browser to `http://127.0.0.1:65020`
//! with `code` and `state` (or `error` / `error_description`) in the query.
//! The listener answers that first request with a static page, hands the
//! query back to the login flow and shuts down.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Port the identity provider is configured to redirect to.
pub const REDIRECT_PORT: u16 = 65020;

const SIGNED_IN_PAGE: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>Signed in</title></head>\
<body style=\"font-family: sans-serif; text-align: center; margin-top: 15%\">\
<h1>Successfully signed in</h1><p>Now you can close this page.</p></body></html>";

const SIGN_IN_FAILED_PAGE: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>Sign in failed</title></head>\
<body style=\"font-family: sans-serif; text-align: center; margin-top: 15%\">\
<h1>Sign in failed</h1><p>Return to the application for details.</p></body></html>";

/// Query parameters of the redirect request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl RedirectParams {
    fn is_error(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.error) || present(&self.error_description)
    }

    /// Extract the authorization code, checking the echoed `state`.
    pub fn into_code(self, expected_state: &str) -> Result<String> {
        if self.is_error() {
            let message = self
                .error_description
                .filter(|d| !d.is_empty())
                .or(self.error)
                .unwrap_or_default();
            return Err(Error::LoginRejected(message));
        }
        if self.state.as_deref() != Some(expected_state) {
            return Err(Error::StateMismatch);
        }
        self.code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::LoginRejected("redirect carried no authorization code".into()))
    }
}

type Slot = Arc<Mutex<Option<oneshot::Sender<RedirectParams>>>>;

async fn redirect_handler(
    State(slot): State<Slot>,
    Query(params): Query<RedirectParams>,
) -> Html<&'static str> {
    let page = if params.is_error() {
        SIGN_IN_FAILED_PAGE
    } else {
        SIGNED_IN_PAGE
    };
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    match sender {
        Some(sender) => {
            let _ = sender.send(params);
        }
        None => debug!("ignoring repeated redirect request"),
    }
    Html(page)
}

fn router(slot: Slot) -> Router {
    Router::new().route("/", get(redirect_handler)).with_state(slot)
}

/// A bound loopback listener waiting for one redirect.
pub struct LoopbackListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl LoopbackListener {
    /// Bind `127.0.0.1:<port>`. Port 0 picks a free port.
    pub async fn bind(port: u16) -> Result<Self> {
        let requested = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(requested)
            .await
            .map_err(|source| Error::Listener {
                addr: requested,
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| Error::Listener {
            addr: requested,
            source,
        })?;
        debug!(%addr, "loopback listener bound");
        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Redirect URI to register in the authorization request.
    pub fn redirect_uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Serve until the first redirect arrives or `timeout` passes, then close.
    pub async fn wait(self, timeout: Duration) -> Result<RedirectParams> {
        let Self { listener, addr } = self;
        let (tx, rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let app = router(Arc::new(Mutex::new(Some(tx))));

        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let result = tokio::time::timeout(timeout, rx).await;
        let _ = stop_tx.send(());
        if tokio::time::timeout(Duration::from_secs(5), &mut server)
            .await
            .is_err()
        {
            warn!("loopback listener did not drain, aborting");
            server.abort();
        }

        match result {
            Ok(Ok(params)) => {
                info!(%addr, "received sign-in redirect");
                Ok(params)
            }
            Ok(Err(_)) => Err(Error::LoginRejected("redirect listener stopped".into())),
            Err(_) => Err(Error::LoginTimeout),
        }
    }
}
