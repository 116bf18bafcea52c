//! Account session management for desktop applications
//!
//! `AccessController` ties the pieces together: it signs the user in through
//! the system browser and a loopback redirect listener, registers the bearer
//! token with the `AuthStore` the transport consults on every request, keeps
//! identity and entitlement state fresh in background tasks and persists the
//! minimum needed to restore the session on the next start.

pub mod browser;
pub mod controller;
pub mod error;
pub mod loopback;
pub mod settings;
pub mod userinfo;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use controller::{AccessConfig, AccessController, AccessEvent, RefreshTasks};
pub use error::{Error, Result};
pub use loopback::{LoopbackListener, REDIRECT_PORT, RedirectParams};
pub use settings::{JsonFileSettings, SETTINGS_FILE, Settings, SettingsStore};
pub use userinfo::{LICENSE_FILE, UserInfo, decode_jwt_claims};
