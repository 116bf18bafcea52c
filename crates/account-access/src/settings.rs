//! Persisted account settings
//!
//! A flat string map holding identity, the current token set and the last
//! entitlement claim. `JsonFileSettings` keeps it in `settings.json` inside
//! the per-client config directory. Writes go to a temp file that is renamed
//! over the target, with 0600 permissions since the file holds tokens.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};
use transport::BoxFuture;

use crate::error::{Error, Result};

pub const SETTINGS_FILE: &str = "settings.json";

/// Setting keys.
pub mod keys {
    pub const USER_ID: &str = "user_id";
    pub const FIRST_NAME: &str = "first_name";
    pub const LAST_NAME: &str = "last_name";
    pub const EMAIL: &str = "email";
    /// Comma-separated.
    pub const ROLES: &str = "roles";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const UPDATE_TOKEN: &str = "update_token";
    pub const EXPIRES_IN: &str = "expires_in";
    /// `"true"` or `"false"`.
    pub const SUPPORTED: &str = "supported";
    pub const START_DATE: &str = "start_date";
    pub const END_DATE: &str = "end_date";
    /// Standard Base64 entitlement signature.
    pub const SIGN: &str = "sign";
}

pub type Settings = BTreeMap<String, String>;

/// Read a value, treating an empty string as absent.
pub fn value<'a>(settings: &'a Settings, key: &str) -> Option<&'a str> {
    settings.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

/// Storage for account settings.
///
/// Boxed-future methods keep the trait dyn-compatible so hosts can supply
/// their own backend.
pub trait SettingsStore: Send + Sync {
    /// Current values.
    fn snapshot(&self) -> BoxFuture<'_, Settings>;

    /// Merge `changes` into the stored values and persist them.
    fn apply(&self, changes: Settings) -> BoxFuture<'_, Result<()>>;
}

/// Settings kept in a JSON file.
pub struct JsonFileSettings {
    path: PathBuf,
    state: Mutex<Settings>,
}

impl JsonFileSettings {
    /// Load settings from `path`, starting empty if the file does not exist.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path).await?;
            let settings: Settings = serde_json::from_str(&contents)
                .map_err(|e| Error::Settings(format!("parsing {}: {e}", path.display())))?;
            info!(path = %path.display(), keys = settings.len(), "loaded settings");
            settings
        } else {
            info!(path = %path.display(), "settings file not found, starting empty");
            Settings::new()
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Settings file for a per-client config directory.
    pub async fn in_dir(dir: &Path) -> Result<Self> {
        Self::load(dir.join(SETTINGS_FILE)).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileSettings {
    fn snapshot(&self) -> BoxFuture<'_, Settings> {
        Box::pin(async move { self.state.lock().await.clone() })
    }

    fn apply(&self, changes: Settings) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let keys: Vec<&str> = changes.keys().map(String::as_str).collect();
            debug!(?keys, "updating settings");
            state.extend(changes);
            write_atomic(&self.path, &state).await
        })
    }
}

/// Write settings atomically via temp file and rename.
async fn write_atomic(path: &Path, data: &Settings) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Settings(format!("serializing settings: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Settings("settings path has no parent directory".into()))?;
    tokio::fs::create_dir_all(dir).await?;

    let tmp_path = dir.join(format!(".settings.tmp.{}", std::process::id()));
    tokio::fs::write(&tmp_path, json.as_bytes()).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms).await?;
    }

    tokio::fs::rename(&tmp_path, path).await?;
    debug!(path = %path.display(), "persisted settings");
    Ok(())
}
