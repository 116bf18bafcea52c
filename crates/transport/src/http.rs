//! reqwest-backed transport
//!
//! Applies configured static headers, then asks the installed `AuthMiddleware`
//! for the `Authorization` header, then sends. Connection-level failures are
//! retried `max_retry` times with a fixed delay; HTTP error statuses are
//! returned to the caller untouched.

use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hook::auth_suspended;
use crate::{AuthMiddleware, BoxFuture, FetchOptions, HttpResponse, Transport};

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Timeouts and retry policy handed to the HTTP client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    /// Extra attempts after a connection failure.
    pub max_retry: u32,
    pub retry_delay: Duration,
    /// Static headers added to every request. Never overrides `Authorization`.
    pub headers: Vec<HeaderInjection>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            timeout: Duration::from_secs(20),
            max_retry: 3,
            retry_delay: Duration::from_secs(5),
            headers: Vec::new(),
        }
    }
}

/// HTTP transport with a single before-send authorization hook.
///
/// The hook is held weakly: the registry that implements it usually owns
/// strategies that hold this transport, and a strong reference would form a
/// cycle. Once the registry is dropped the hook silently stops applying.
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
    hook: RwLock<Option<Weak<dyn AuthMiddleware>>>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Setup(e.to_string()))?;
        Ok(Self {
            client,
            config,
            hook: RwLock::new(None),
        })
    }

    /// Install the before-send hook, replacing any previous one.
    pub fn install_hook(&self, hook: &Arc<dyn AuthMiddleware>) {
        let mut slot = self.hook.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::downgrade(hook));
        debug!("authorization hook installed");
    }

    fn current_hook(&self) -> Option<Arc<dyn AuthMiddleware>> {
        let slot = self.hook.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().and_then(Weak::upgrade)
    }

    /// Apply static headers and the authorization hook to `headers`.
    ///
    /// An `Authorization` header the caller set explicitly is left alone.
    async fn before_send(&self, url: &str, headers: &mut HeaderMap) {
        for injection in &self.config.headers {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            if name == AUTHORIZATION {
                warn!(header = %injection.name, "refusing to inject authorization header from config");
                continue;
            }
            let value = match HeaderValue::from_str(&injection.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            headers.insert(name, value);
        }

        if headers.contains_key(AUTHORIZATION) || auth_suspended() {
            return;
        }
        let Some(hook) = self.current_hook() else {
            return;
        };
        if let Some(value) = hook.authorization(url).await {
            headers.insert(AUTHORIZATION, value);
        }
    }

    /// Send with retry on connection failure, then buffer the response.
    async fn send<F>(&self, url: &str, build: F) -> Result<HttpResponse>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            match build().send().await {
                Ok(response) => return buffer(response).await,
                Err(e) if e.is_connect() && attempt < self.config.max_retry => {
                    attempt += 1;
                    warn!(
                        url,
                        attempt,
                        max_retry = self.config.max_retry,
                        error = %e,
                        "connection failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

async fn buffer(response: reqwest::Response) -> Result<HttpResponse> {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::Body(e.to_string()))?;
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

impl Transport for HttpTransport {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        options: FetchOptions,
    ) -> BoxFuture<'a, Result<HttpResponse>> {
        Box::pin(async move {
            let FetchOptions {
                method,
                mut headers,
                body,
            } = options;
            self.before_send(url, &mut headers).await;
            debug!(url, method = %method, "sending request");
            self.send(url, || {
                let request = self
                    .client
                    .request(method.clone(), url)
                    .headers(headers.clone());
                match &body {
                    Some(b) => request.body(b.clone()),
                    None => request,
                }
            })
            .await
        })
    }

    fn post_form<'a>(
        &'a self,
        url: &'a str,
        form: &'a [(&'a str, &'a str)],
    ) -> BoxFuture<'a, Result<HttpResponse>> {
        Box::pin(async move {
            let mut headers = HeaderMap::new();
            self.before_send(url, &mut headers).await;
            debug!(url, "sending form post");
            self.send(url, || {
                self.client
                    .post(url)
                    .headers(headers.clone())
                    .form(form)
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::without_auth;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hands out a fixed bearer value and counts calls.
    struct FixedAuth {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl AuthMiddleware for FixedAuth {
        fn authorization<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Option<HeaderValue>> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async { Some(HeaderValue::from_static("Bearer at_hook")) })
        }
    }

    fn quick_config() -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
            max_retry: 0,
            retry_delay: Duration::from_millis(10),
            headers: Vec::new(),
        }
    }

    fn fixed_auth() -> Arc<FixedAuth> {
        Arc::new(FixedAuth {
            calls: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn hook_supplies_authorization_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user_info/"))
            .and(header("authorization", "Bearer at_hook"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(quick_config()).unwrap();
        let auth = fixed_auth();
        let hook: Arc<dyn AuthMiddleware> = auth.clone();
        transport.install_hook(&hook);

        let url = format!("{}/user_info/", server.uri());
        let response = transport.fetch(&url, FetchOptions::get()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(auth.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn suspended_requests_skip_the_hook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token/"))
            .and(body_string("grant_type=refresh_token&client_id=abc"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(quick_config()).unwrap();
        let auth = fixed_auth();
        let hook: Arc<dyn AuthMiddleware> = auth.clone();
        transport.install_hook(&hook);

        let url = format!("{}/oauth2/token/", server.uri());
        let form = [("grant_type", "refresh_token"), ("client_id", "abc")];
        let response = without_auth(transport.post_form(&url, &form))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(auth.calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get("authorization").is_none());

        // The hook applies again once the scope has ended.
        transport.post_form(&url, &form).await.unwrap();
        assert_eq!(auth.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_hook_stops_applying() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(quick_config()).unwrap();
        {
            let hook: Arc<dyn AuthMiddleware> = fixed_auth();
            transport.install_hook(&hook);
        }

        transport
            .fetch(&server.uri(), FetchOptions::get())
            .await
            .unwrap();
        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn explicit_authorization_wins_over_hook() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(quick_config()).unwrap();
        let hook: Arc<dyn AuthMiddleware> = fixed_auth();
        transport.install_hook(&hook);

        let mut options = FetchOptions::get();
        options.headers.insert(
            AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        let response = transport.fetch(&server.uri(), options).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn static_headers_never_override_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "account-agent/0.1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = quick_config();
        config.headers = vec![
            HeaderInjection {
                name: "authorization".into(),
                value: "Bearer INJECTED".into(),
            },
            HeaderInjection {
                name: "invalid header name".into(),
                value: "x".into(),
            },
            HeaderInjection {
                name: "user-agent".into(),
                value: "account-agent/0.1".into(),
            },
        ];
        let transport = HttpTransport::new(config).unwrap();
        transport
            .fetch(&server.uri(), FetchOptions::get())
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn error_status_is_a_response_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(quick_config()).unwrap();
        let response = transport
            .fetch(&server.uri(), FetchOptions::get())
            .await
            .unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(response.text(), "denied");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        // Bind then drop a listener so the port is known to be closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(quick_config()).unwrap();
        let result = transport
            .fetch(&format!("http://{addr}/"), FetchOptions::get())
            .await;
        assert!(
            matches!(result, Err(Error::Connect(_)) | Err(Error::Request(_))),
            "got: {result:?}"
        );
    }
}
