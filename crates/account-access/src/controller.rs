//! Account session controller
//!
//! Owns the signed-in state of the application: restores it from settings at
//! startup, runs the browser sign-in, signs out, keeps user and support info
//! fresh in background tasks and probes whether the account service is
//! reachable. Changes are announced over a broadcast channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use account_auth::pkce::{AuthorizationRequest, PkcePair, build_authorization_url, generate_state};
use account_auth::token::{CodeExchange, exchange_code};
use account_auth::{AuthStore, BearerAuthStrategy, BearerCredentials};
use account_license::{Entitlement, EntitlementStatus, PublicKeyCache, key_dir};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use transport::{FetchOptions, Transport, without_auth};

use crate::browser::BrowserLauncher;
use crate::error::{Error, Result};
use crate::loopback::{LoopbackListener, REDIRECT_PORT};
use crate::settings::{Settings, SettingsStore, keys, value};
use crate::userinfo::{
    LICENSE_FILE, UserInfo, decode_jwt_claims, entitlement_from_json, entitlement_from_settings,
    entitlement_to_settings, read_license_file,
};

/// Static account configuration.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub client_id: String,
    pub scope: String,
    /// Account API root; also the primary prefix the bearer token is registered under.
    pub api_endpoint: String,
    pub token_endpoint: String,
    pub auth_endpoint: String,
    /// Revoke endpoint called on logout.
    pub logout_endpoint: Option<String>,
    /// Additional origins that receive the bearer token.
    pub extra_origins: Vec<String>,
    pub pkce: bool,
    /// Fall back to access-token claims when the user-info endpoint fails.
    pub jwt_user_info: bool,
    /// Base directory; per-client state lives in `key_dir(config_dir, client_id)`.
    pub config_dir: PathBuf,
    /// Directory searched for `license.json`.
    pub license_dir: PathBuf,
    pub redirect_port: u16,
    pub login_timeout: Duration,
}

impl AccessConfig {
    pub fn new(client_id: impl Into<String>, api_endpoint: impl Into<String>) -> Self {
        let api_endpoint = api_endpoint.into();
        Self {
            client_id: client_id.into(),
            scope: "user_info.read".into(),
            token_endpoint: format!("{api_endpoint}/oauth2/token/"),
            auth_endpoint: format!("{api_endpoint}/oauth2/authorize/"),
            api_endpoint,
            logout_endpoint: None,
            extra_origins: Vec::new(),
            pkce: true,
            jwt_user_info: false,
            config_dir: PathBuf::from("."),
            license_dir: PathBuf::from("/usr/share/license"),
            redirect_port: REDIRECT_PORT,
            login_timeout: Duration::from_secs(300),
        }
    }

    /// Per-client directory holding settings and the cached public key.
    pub fn client_dir(&self) -> PathBuf {
        key_dir(&self.config_dir, &self.client_id)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}/", self.api_endpoint.trim_end_matches('/'))
    }
}

/// Announcements to observers of the account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessEvent {
    LoggedIn,
    UserInfoUpdated,
    SupportInfoUpdated,
}

/// Handles of the background refreshes started by login or restore.
#[derive(Debug)]
pub struct RefreshTasks {
    pub user_info: JoinHandle<()>,
    pub entitlement: JoinHandle<()>,
}

impl RefreshTasks {
    /// Wait for both refreshes.
    pub async fn join(self) {
        if let Err(e) = self.user_info.await {
            warn!(error = %e, "user info task failed");
        }
        if let Err(e) = self.entitlement.await {
            warn!(error = %e, "entitlement task failed");
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    authorized: bool,
    supported: bool,
    user: UserInfo,
}

type TokenSnapshot = (Option<String>, Option<String>);

pub struct AccessController {
    config: AccessConfig,
    transport: Arc<dyn Transport>,
    store: Arc<AuthStore>,
    settings: Arc<dyn SettingsStore>,
    keys: PublicKeyCache,
    session: RwLock<SessionState>,
    endpoint_available: AtomicBool,
    events: broadcast::Sender<AccessEvent>,
    /// Serializes entitlement checks so the last one sees every settings write.
    support_check: tokio::sync::Mutex<()>,
}

impl AccessController {
    pub fn new(
        config: AccessConfig,
        transport: Arc<dyn Transport>,
        store: Arc<AuthStore>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let keys = PublicKeyCache::new(config.client_dir());
        let (events, _) = broadcast::channel(16);
        Self {
            config,
            transport,
            store,
            settings,
            keys,
            session: RwLock::new(SessionState::default()),
            endpoint_available: AtomicBool::new(true),
            events,
            support_check: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AccessEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: AccessEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn session(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn session_mut(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_user_authorized(&self) -> bool {
        self.session().authorized
    }

    /// True only after an entitlement verification succeeded in this process.
    pub fn is_user_supported(&self) -> bool {
        self.session().supported
    }

    pub fn is_function_available(&self, _app: &str, _function: &str) -> bool {
        self.is_user_supported()
    }

    /// Whether an enterprise `license.json` is installed.
    pub fn is_enterprise(&self) -> bool {
        self.config.license_dir.join(LICENSE_FILE).is_file()
    }

    pub fn user_info(&self) -> UserInfo {
        self.session().user.clone()
    }

    pub fn endpoint_available(&self) -> bool {
        self.endpoint_available.load(Ordering::Relaxed)
    }

    /// Prefixes the bearer token is registered under.
    fn auth_urls(&self) -> Vec<String> {
        std::iter::once(self.config.api_endpoint.clone())
            .chain(self.config.extra_origins.iter().cloned())
            .collect()
    }

    /// Restore the session persisted by a previous run.
    ///
    /// Returns the refresh tasks when any were started.
    #[instrument(skip_all)]
    pub async fn restore(self: &Arc<Self>) -> Result<Option<RefreshTasks>> {
        if self.load_session().await? {
            return Ok(Some(self.refresh_all()));
        }
        if self.is_enterprise() {
            info!("enterprise license present, loading account from it");
            return Ok(Some(self.refresh_all()));
        }
        debug!("no stored account");
        Ok(None)
    }

    /// Register the persisted token set and verify the persisted entitlement
    /// without network traffic. Returns whether a stored account was found.
    pub async fn load_session(&self) -> Result<bool> {
        let settings = self.settings.snapshot().await;
        if value(&settings, keys::USER_ID).is_none() {
            return Ok(false);
        }

        if let Some(access_token) = value(&settings, keys::ACCESS_TOKEN) {
            let strategy = BearerAuthStrategy::new(
                BearerCredentials {
                    client_id: self.config.client_id.clone(),
                    token_server: self.config.token_endpoint.clone(),
                    access_token: access_token.to_owned(),
                    refresh_token: value(&settings, keys::UPDATE_TOKEN)
                        .unwrap_or_default()
                        .to_owned(),
                    expires_in: value(&settings, keys::EXPIRES_IN)
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                    last_refresh: 0,
                },
                Arc::clone(&self.transport),
            );
            self.store.register(self.auth_urls().as_slice(), strategy).await?;
        }

        let supported = self.verify_entitlement(&entitlement_from_settings(&settings));
        {
            let mut session = self.session_mut();
            session.authorized = true;
            session.supported = supported;
            session.user = UserInfo::from_settings(&settings);
        }
        info!(supported, "restored stored account");
        Ok(true)
    }

    /// Sign in through the system browser.
    ///
    /// Binds the loopback listener, opens the authorization URL, waits for the
    /// redirect and exchanges the code. On success the token set is persisted
    /// and user/support refreshes are started.
    #[instrument(skip_all)]
    pub async fn login(self: &Arc<Self>, browser: &dyn BrowserLauncher) -> Result<RefreshTasks> {
        let result = async {
            self.ensure_endpoint_available()?;
            let listener = LoopbackListener::bind(self.config.redirect_port).await?;
            self.run_login(browser, listener).await
        }
        .await;
        record_login(&result);
        result
    }

    /// Sign in using a listener the caller already bound.
    #[instrument(skip_all, fields(addr = %listener.local_addr()))]
    pub async fn login_with_listener(
        self: &Arc<Self>,
        browser: &dyn BrowserLauncher,
        listener: LoopbackListener,
    ) -> Result<RefreshTasks> {
        let result = async {
            self.ensure_endpoint_available()?;
            self.run_login(browser, listener).await
        }
        .await;
        record_login(&result);
        result
    }

    fn ensure_endpoint_available(&self) -> Result<()> {
        if self.endpoint_available() {
            Ok(())
        } else {
            Err(Error::EndpointUnavailable(self.config.api_endpoint.clone()))
        }
    }

    async fn run_login(
        self: &Arc<Self>,
        browser: &dyn BrowserLauncher,
        listener: LoopbackListener,
    ) -> Result<RefreshTasks> {
        let redirect_uri = listener.redirect_uri();
        let state = generate_state();
        let pkce = self.config.pkce.then(PkcePair::generate);
        let url = build_authorization_url(&AuthorizationRequest {
            auth_endpoint: &self.config.auth_endpoint,
            client_id: &self.config.client_id,
            redirect_uri: &redirect_uri,
            scope: &self.config.scope,
            state: &state,
            code_challenge: pkce.as_ref().map(|p| p.challenge.as_str()),
        })?;

        info!(%redirect_uri, "waiting for browser sign in");
        browser.open(&url).await?;
        let code = listener
            .wait(self.config.login_timeout)
            .await?
            .into_code(&state)?;

        let strategy = exchange_code(
            &self.transport,
            &CodeExchange {
                token_server: &self.config.token_endpoint,
                client_id: &self.config.client_id,
                code: &code,
                redirect_uri: &redirect_uri,
                code_verifier: pkce.as_ref().map(|p| p.verifier.as_str()),
            },
        )
        .await?;
        self.store.register(self.auth_urls().as_slice(), strategy).await?;
        self.save().await?;

        info!("signed in");
        self.emit(AccessEvent::LoggedIn);
        Ok(self.refresh_all())
    }

    /// Sign out: forget the identity and tokens and drop the credentials.
    #[instrument(skip_all)]
    pub async fn logout(&self) -> Result<()> {
        let cleared: Settings = [
            keys::USER_ID,
            keys::FIRST_NAME,
            keys::LAST_NAME,
            keys::EMAIL,
            keys::ROLES,
            keys::ACCESS_TOKEN,
            keys::UPDATE_TOKEN,
            keys::EXPIRES_IN,
        ]
        .into_iter()
        .map(|key| (key.to_owned(), String::new()))
        .collect();
        let persisted = self.settings.apply(cleared).await;

        let logout_url = self.config.logout_endpoint.as_deref();
        for (index, url) in self.auth_urls().iter().enumerate() {
            // One revoke is enough; every prefix shares the same token.
            let revoke_at = if index == 0 { logout_url } else { None };
            self.store.unregister(url, revoke_at).await;
        }

        *self.session_mut() = SessionState::default();
        info!("signed out");
        self.emit(AccessEvent::UserInfoUpdated);
        self.emit(AccessEvent::SupportInfoUpdated);
        persisted
    }

    /// Persist the current token set of the API strategy.
    pub async fn save(&self) -> Result<()> {
        let properties = self.store.properties_for(&self.config.api_endpoint).await;
        if properties.is_empty() {
            debug!("no credentials to save");
            return Ok(());
        }
        let field = |name: &str| properties.get(name).cloned().unwrap_or_default();
        let changes = Settings::from([
            (keys::ACCESS_TOKEN.to_owned(), field("accessToken")),
            (keys::UPDATE_TOKEN.to_owned(), field("refreshToken")),
            (keys::EXPIRES_IN.to_owned(), field("expiresIn")),
        ]);
        self.settings.apply(changes).await
    }

    async fn token_snapshot(&self) -> TokenSnapshot {
        let mut properties = self.store.properties_for(&self.config.api_endpoint).await;
        (
            properties.remove("accessToken"),
            properties.remove("refreshToken"),
        )
    }

    /// Persist tokens if a refresh happened since `before` was taken.
    async fn save_if_tokens_changed(&self, before: TokenSnapshot) {
        if self.token_snapshot().await == before {
            return;
        }
        if let Err(e) = self.save().await {
            warn!(error = %e, "failed to persist refreshed tokens");
        }
    }

    /// Start both background refreshes.
    pub fn refresh_all(self: &Arc<Self>) -> RefreshTasks {
        RefreshTasks {
            user_info: self.refresh_user_info(),
            entitlement: self.refresh_entitlement(),
        }
    }

    /// Refresh user info in the background.
    pub fn refresh_user_info(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let before = this.token_snapshot().await;
            let previous_id = value(&this.settings.snapshot().await, keys::USER_ID)
                .unwrap_or_default()
                .to_owned();
            match this.fetch_user_info().await {
                Ok(Some(user)) => {
                    if let Err(e) = this.settings.apply(user.to_settings()).await {
                        warn!(error = %e, "failed to persist user info");
                    }
                }
                Ok(None) => debug!("no user info source answered"),
                Err(e) => warn!(error = %e, "user info refresh failed"),
            }

            let settings = this.settings.snapshot().await;
            let user_id = value(&settings, keys::USER_ID);
            {
                let mut session = this.session_mut();
                session.authorized = user_id.is_some();
                session.user = if session.authorized {
                    UserInfo::from_settings(&settings)
                } else {
                    UserInfo::default()
                };
            }
            this.emit(AccessEvent::UserInfoUpdated);

            // The signed claim covers the user id.
            if user_id.unwrap_or_default() != previous_id {
                this.update_supported().await;
                this.emit(AccessEvent::SupportInfoUpdated);
            }
            this.save_if_tokens_changed(before).await;
        })
    }

    /// License file first, then the account API, then access-token claims.
    async fn fetch_user_info(&self) -> Result<Option<UserInfo>> {
        if let Some(license) = read_license_file(&self.config.license_dir).await? {
            return Ok(Some(UserInfo::from_json(&license)));
        }
        match self.get_json(&self.config.api_url("user_info")).await {
            Ok(body) => return Ok(Some(UserInfo::from_json(&body))),
            Err(e) if !self.config.jwt_user_info => return Err(e),
            Err(e) => debug!(error = %e, "user info endpoint failed, trying token claims"),
        }

        let properties = self.store.properties_for(&self.config.api_endpoint).await;
        let Some(access_token) = properties.get("accessToken").filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let claims = decode_jwt_claims(access_token)?;
        let user = UserInfo::from_claims(&claims);
        Ok((!user.is_empty()).then_some(user))
    }

    /// Refresh the entitlement in the background and re-verify it.
    pub fn refresh_entitlement(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let before = this.token_snapshot().await;
            if let Err(e) = this.update_support_info().await {
                warn!(error = %e, "support info refresh failed");
            }

            this.update_supported().await;
            this.emit(AccessEvent::SupportInfoUpdated);
            this.save_if_tokens_changed(before).await;
        })
    }

    async fn update_support_info(&self) -> Result<()> {
        let settings = self.settings.snapshot().await;
        let user_id = value(&settings, keys::USER_ID).unwrap_or_default();
        let claim = match read_license_file(&self.config.license_dir).await? {
            Some(license) => entitlement_from_json(&license, user_id),
            None => {
                let body = self.get_json(&self.config.api_url("support_info")).await?;
                entitlement_from_json(&body, user_id)
            }
        };
        self.settings.apply(entitlement_to_settings(&claim)).await?;

        if claim.supported {
            self.fetch_public_key().await?;
        }
        Ok(())
    }

    async fn fetch_public_key(&self) -> Result<()> {
        let url = self.config.api_url("rsa_public_key");
        let response = self.transport.fetch(&url, FetchOptions::accept_any()).await?;
        if !response.is_success() {
            return Err(Error::Decode(format!(
                "public key download returned {}",
                response.status
            )));
        }
        self.keys.store(&response.text())?;
        Ok(())
    }

    /// The enterprise license claim when installed, else the persisted one.
    async fn current_entitlement(&self) -> Entitlement {
        let settings = self.settings.snapshot().await;
        match read_license_file(&self.config.license_dir).await {
            Ok(Some(license)) => {
                let user_id = value(&settings, keys::USER_ID).unwrap_or_default();
                entitlement_from_json(&license, user_id)
            }
            Ok(None) => entitlement_from_settings(&settings),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable license file");
                entitlement_from_settings(&settings)
            }
        }
    }

    /// Verify the current entitlement and record the result in the session.
    async fn update_supported(&self) {
        let _guard = self.support_check.lock().await;
        let entitlement = self.current_entitlement().await;
        let supported = self.verify_entitlement(&entitlement);
        self.session_mut().supported = supported;
    }

    /// Verify the current entitlement against the cached public key without
    /// touching the network or the session state.
    pub async fn check_stored_entitlement(&self) -> EntitlementStatus {
        let entitlement = self.current_entitlement().await;
        self.keys.check(&entitlement, chrono::Local::now().date_naive())
    }

    fn verify_entitlement(&self, entitlement: &Entitlement) -> bool {
        let today = chrono::Local::now().date_naive();
        match self.keys.check(entitlement, today) {
            EntitlementStatus::Supported => true,
            EntitlementStatus::Unsupported => {
                debug!("account is not supported");
                false
            }
            EntitlementStatus::Expired => {
                info!("account support period is over");
                false
            }
            EntitlementStatus::Rejected(reason) => {
                warn!(%reason, "account support claim failed verification");
                false
            }
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self.transport.fetch(url, FetchOptions::accept_any()).await?;
        if !response.is_success() {
            return Err(Error::Decode(format!("{url} returned {}", response.status)));
        }
        response.json().map_err(Error::from)
    }

    /// Probe `url` with an uncredentialed HEAD request. Any response below
    /// 500 counts as available.
    pub async fn check_endpoint_reachability(&self, url: &str) -> bool {
        let available = match without_auth(self.transport.fetch(url, FetchOptions::head())).await {
            Ok(response) => response.status < 500,
            Err(e) => {
                debug!(%url, error = %e, "endpoint unreachable");
                false
            }
        };
        let previous = self.endpoint_available.swap(available, Ordering::Relaxed);
        if previous != available {
            info!(%url, available, "endpoint availability changed");
        }
        available
    }

    /// Probe the account API every `interval`, measured from the end of the
    /// previous probe.
    pub fn spawn_reachability_probe(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let url = this.config.api_endpoint.clone();
                this.check_endpoint_reachability(&url).await;
                tokio::time::sleep(interval).await;
            }
        })
    }
}

fn record_login<T>(result: &Result<T>) {
    let outcome = if result.is_ok() { "success" } else { "failure" };
    metrics::counter!("account_logins_total", "outcome" => outcome).increment(1);
}

impl std::fmt::Debug for AccessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessController")
            .field("client_id", &self.config.client_id)
            .field("api_endpoint", &self.config.api_endpoint)
            .finish_non_exhaustive()
    }
}
