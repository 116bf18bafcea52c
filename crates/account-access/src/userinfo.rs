//! Identity and support records from the license file, the account API or
//! JWT claims

use std::path::Path;

use account_auth::crypto::base64url_decode;
use account_license::Entitlement;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::settings::{Settings, keys, value};

/// Enterprise license dropped next to the installation.
pub const LICENSE_FILE: &str = "license.json";

/// Who is signed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub roles: Vec<String>,
}

fn str_field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| value.get(*name))
        .find_map(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn owned(value: &Value, names: &[&str]) -> String {
    str_field(value, names).unwrap_or_default().to_owned()
}

fn roles(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        Some(Value::String(list)) => split_roles(list),
        _ => Vec::new(),
    }
}

fn split_roles(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Truthiness of a `supported` field: booleans, `"true"`/`"1"`, non-zero numbers.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

impl UserInfo {
    /// From a `user_info` response or `license.json`.
    pub fn from_json(value: &Value) -> Self {
        Self {
            user_id: owned(value, &["nextgis_guid", "user_id"]),
            first_name: owned(value, &["first_name"]),
            last_name: owned(value, &["last_name"]),
            email: owned(value, &["email"]),
            roles: roles(value.get("roles")),
        }
    }

    /// From OpenID Connect style access-token claims.
    pub fn from_claims(claims: &Value) -> Self {
        let roles = match claims.get("roles") {
            Some(list) => roles(Some(list)),
            None => roles(claims.get("realm_access").and_then(|r| r.get("roles"))),
        };
        Self {
            user_id: owned(claims, &["sub"]),
            first_name: owned(claims, &["given_name", "first_name"]),
            last_name: owned(claims, &["family_name", "last_name"]),
            email: owned(claims, &["email"]),
            roles,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let get = |key| value(settings, key).unwrap_or_default().to_owned();
        Self {
            user_id: get(keys::USER_ID),
            first_name: get(keys::FIRST_NAME),
            last_name: get(keys::LAST_NAME),
            email: get(keys::EMAIL),
            roles: value(settings, keys::ROLES)
                .map(split_roles)
                .unwrap_or_default(),
        }
    }

    pub fn to_settings(&self) -> Settings {
        Settings::from([
            (keys::USER_ID.to_owned(), self.user_id.clone()),
            (keys::FIRST_NAME.to_owned(), self.first_name.clone()),
            (keys::LAST_NAME.to_owned(), self.last_name.clone()),
            (keys::EMAIL.to_owned(), self.email.clone()),
            (keys::ROLES.to_owned(), self.roles.join(",")),
        ])
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_empty()
    }
}

/// Entitlement claim from a `support_info` response or `license.json`.
///
/// The signed user id comes from the record when present, else `user_id`.
pub fn entitlement_from_json(value: &Value, user_id: &str) -> Entitlement {
    Entitlement {
        user_id: str_field(value, &["nextgis_guid", "user_id"])
            .unwrap_or(user_id)
            .to_owned(),
        start_date: owned(value, &["start_date"]),
        end_date: owned(value, &["end_date"]),
        signature: owned(value, &["sign"]),
        supported: truthy(value.get("supported")),
    }
}

/// Entitlement last persisted to settings.
pub fn entitlement_from_settings(settings: &Settings) -> Entitlement {
    let get = |key| value(settings, key).unwrap_or_default().to_owned();
    Entitlement {
        user_id: get(keys::USER_ID),
        start_date: get(keys::START_DATE),
        end_date: get(keys::END_DATE),
        signature: get(keys::SIGN),
        supported: value(settings, keys::SUPPORTED) == Some("true"),
    }
}

/// Settings recording an entitlement claim. Signature and dates are only
/// replaced when support is claimed.
pub fn entitlement_to_settings(entitlement: &Entitlement) -> Settings {
    let mut settings = Settings::from([(
        keys::SUPPORTED.to_owned(),
        entitlement.supported.to_string(),
    )]);
    if entitlement.supported {
        settings.insert(keys::SIGN.to_owned(), entitlement.signature.clone());
        settings.insert(keys::START_DATE.to_owned(), entitlement.start_date.clone());
        settings.insert(keys::END_DATE.to_owned(), entitlement.end_date.clone());
    }
    settings
}

/// Read `license.json` from `dir`, if present.
pub async fn read_license_file(dir: &Path) -> Result<Option<Value>> {
    let path = dir.join(LICENSE_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let contents = tokio::fs::read_to_string(&path).await?;
    let value = serde_json::from_str(&contents)
        .map_err(|e| Error::Decode(format!("parsing {}: {e}", path.display())))?;
    Ok(Some(value))
}

/// Decode the payload of a JWT without verifying it.
///
/// The token must have exactly three `.`-separated segments and the payload
/// must be a JSON object.
pub fn decode_jwt_claims(token: &str) -> Result<Value> {
    let segments: Vec<&str> = token.split('.').collect();
    let [_, payload, _] = segments.as_slice() else {
        return Err(Error::Decode(format!(
            "token has {} segments, expected 3",
            segments.len()
        )));
    };
    let bytes = base64url_decode(payload).map_err(|e| Error::Decode(e.to_string()))?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Decode(format!("token payload is not JSON: {e}")))?;
    if !claims.is_object() {
        return Err(Error::Decode("token payload is not a JSON object".into()));
    }
    Ok(claims)
}
