//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Tokens are never part of the config; they live in the per-client
//! settings file the account library maintains.

use std::path::{Path, PathBuf};
use std::time::Duration;

use account_access::{AccessConfig, REDIRECT_PORT};
use serde::Deserialize;
use transport::{HeaderInjection, TransportConfig};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Static headers added to every outgoing request
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

/// Identity provider and account API
#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    pub client_id: String,
    pub api_endpoint: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Defaults to `<api_endpoint>/oauth2/token/`
    #[serde(default)]
    pub token_endpoint: Option<String>,
    /// Defaults to `<api_endpoint>/oauth2/authorize/`
    #[serde(default)]
    pub auth_endpoint: Option<String>,
    #[serde(default)]
    pub logout_endpoint: Option<String>,
    #[serde(default)]
    pub extra_origins: Vec<String>,
    #[serde(default = "default_true")]
    pub pkce: bool,
    #[serde(default)]
    pub jwt_user_info: bool,
}

#[derive(Debug, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default = "default_license_dir")]
    pub license_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            license_dir: default_license_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_timeout(),
            max_retry: default_max_retry(),
            retry_delay_secs: default_retry_delay(),
            probe_interval_secs: default_probe_interval(),
            refresh_interval_secs: default_refresh_interval(),
            login_timeout_secs: default_login_timeout(),
            redirect_port: default_redirect_port(),
        }
    }
}

fn default_scope() -> String {
    "user_info.read".into()
}

fn default_true() -> bool {
    true
}

fn default_config_dir() -> PathBuf {
    PathBuf::from(".account-agent")
}

fn default_license_dir() -> PathBuf {
    PathBuf::from("/usr/share/license")
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_timeout() -> u64 {
    20
}

fn default_max_retry() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_probe_interval() -> u64 {
    60
}

fn default_refresh_interval() -> u64 {
    3600
}

fn default_login_timeout() -> u64 {
    300
}

fn default_redirect_port() -> u16 {
    REDIRECT_PORT
}

fn require_http(field: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )))
    }
}

fn require_nonzero(field: &str, value: u64) -> common::Result<()> {
    if value == 0 {
        return Err(common::Error::Config(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `ACCOUNT_CLIENT_ID` replaces `account.client_id`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(client_id) = std::env::var("ACCOUNT_CLIENT_ID") {
            config.account.client_id = client_id;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let account = &self.account;
        if account.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }
        require_http("api_endpoint", &account.api_endpoint)?;
        for (field, url) in [
            ("token_endpoint", &account.token_endpoint),
            ("auth_endpoint", &account.auth_endpoint),
            ("logout_endpoint", &account.logout_endpoint),
        ] {
            if let Some(url) = url {
                require_http(field, url)?;
            }
        }
        for origin in &account.extra_origins {
            require_http("extra_origins", origin)?;
        }

        let network = &self.network;
        require_nonzero("connect_timeout_secs", network.connect_timeout_secs)?;
        require_nonzero("timeout_secs", network.timeout_secs)?;
        require_nonzero("probe_interval_secs", network.probe_interval_secs)?;
        require_nonzero("refresh_interval_secs", network.refresh_interval_secs)?;
        require_nonzero("login_timeout_secs", network.login_timeout_secs)?;
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("account-agent.toml")
    }

    pub fn access_config(&self) -> AccessConfig {
        let account = &self.account;
        let mut access = AccessConfig::new(
            account.client_id.clone(),
            account.api_endpoint.trim_end_matches('/'),
        );
        access.scope = account.scope.clone();
        if let Some(url) = &account.token_endpoint {
            access.token_endpoint = url.clone();
        }
        if let Some(url) = &account.auth_endpoint {
            access.auth_endpoint = url.clone();
        }
        access.logout_endpoint = account.logout_endpoint.clone();
        access.extra_origins = account.extra_origins.clone();
        access.pkce = account.pkce;
        access.jwt_user_info = account.jwt_user_info;
        access.config_dir = self.paths.config_dir.clone();
        access.license_dir = self.paths.license_dir.clone();
        access.redirect_port = self.network.redirect_port;
        access.login_timeout = Duration::from_secs(self.network.login_timeout_secs);
        access
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.network.connect_timeout_secs),
            timeout: Duration::from_secs(self.network.timeout_secs),
            max_retry: self.network.max_retry,
            retry_delay: Duration::from_secs(self.network.retry_delay_secs),
            headers: self.headers.clone(),
        }
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.network.probe_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.network.refresh_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch process environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    const MINIMAL: &str = r#"
[account]
client_id = "abc"
api_endpoint = "https://my.example.com/api/"
"#;

    fn write(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("account-agent.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn load(contents: &str) -> common::Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        Config::load(&write(&dir, contents))
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ACCOUNT_CLIENT_ID") };

        let config = load(MINIMAL).unwrap();
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.network.timeout_secs, 20);
        assert_eq!(config.network.max_retry, 3);
        assert_eq!(config.network.redirect_port, 65020);

        let access = config.access_config();
        assert_eq!(access.client_id, "abc");
        assert_eq!(access.api_endpoint, "https://my.example.com/api");
        assert_eq!(access.token_endpoint, "https://my.example.com/api/oauth2/token/");
        assert_eq!(access.scope, "user_info.read");
        assert!(access.pkce);
        assert!(access.logout_endpoint.is_none());
    }

    #[test]
    fn full_config_is_mapped() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ACCOUNT_CLIENT_ID") };

        let config = load(
            r#"
log_format = "json"

[account]
client_id = "abc"
api_endpoint = "https://my.example.com/api"
token_endpoint = "https://id.example.com/token"
auth_endpoint = "https://id.example.com/auth"
logout_endpoint = "https://id.example.com/logout"
extra_origins = ["https://files.example.com"]
pkce = false
jwt_user_info = true

[paths]
config_dir = "/var/lib/agent"
license_dir = "/opt/license"

[network]
timeout_secs = 5
max_retry = 0
login_timeout_secs = 60

[[headers]]
name = "user-agent"
value = "account-agent/0.1"
"#,
        )
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);

        let access = config.access_config();
        assert_eq!(access.token_endpoint, "https://id.example.com/token");
        assert_eq!(access.auth_endpoint, "https://id.example.com/auth");
        assert_eq!(access.extra_origins, vec!["https://files.example.com"]);
        assert!(!access.pkce);
        assert!(access.jwt_user_info);
        assert_eq!(access.config_dir, PathBuf::from("/var/lib/agent"));
        assert_eq!(access.login_timeout, Duration::from_secs(60));

        let transport = config.transport_config();
        assert_eq!(transport.timeout, Duration::from_secs(5));
        assert_eq!(transport.max_retry, 0);
        assert_eq!(transport.headers.len(), 1);
        assert_eq!(transport.headers[0].name, "user-agent");
    }

    #[test]
    fn client_id_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("ACCOUNT_CLIENT_ID", "from-env") };
        let config = load(MINIMAL);
        unsafe { remove_env("ACCOUNT_CLIENT_ID") };
        assert_eq!(config.unwrap().account.client_id, "from-env");
    }

    #[test]
    fn empty_client_id_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ACCOUNT_CLIENT_ID") };
        let err = load(
            r#"
[account]
client_id = " "
api_endpoint = "https://my.example.com"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("client_id"), "{err}");
    }

    #[test]
    fn endpoint_without_scheme_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ACCOUNT_CLIENT_ID") };
        let err = load(
            r#"
[account]
client_id = "abc"
api_endpoint = "https://my.example.com"
logout_endpoint = "id.example.com/logout"
"#,
        )
        .unwrap_err();
        assert!(
            err.to_string()
                .contains("logout_endpoint must start with http"),
            "{err}"
        );
    }

    #[test]
    fn zero_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ACCOUNT_CLIENT_ID") };
        let err = load(&format!("{MINIMAL}\n[network]\nlogin_timeout_secs = 0\n")).unwrap_err();
        assert!(err.to_string().contains("login_timeout_secs"), "{err}");
    }

    #[test]
    fn unknown_log_format_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ACCOUNT_CLIENT_ID") };
        assert!(load(&format!("log_format = \"xml\"\n{MINIMAL}")).is_err());
    }

    #[test]
    fn missing_file_and_invalid_toml_are_errors() {
        assert!(Config::load(Path::new("/nonexistent/account-agent.toml")).is_err());
        assert!(matches!(
            load("not valid {{{{ toml"),
            Err(common::Error::Toml(_))
        ));
    }

    #[test]
    fn resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(path, PathBuf::from("/env/path.toml"));
    }

    #[test]
    fn resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("account-agent.toml"));
    }

    #[test]
    fn resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(path, PathBuf::from("/cli/wins.toml"));
    }
}
