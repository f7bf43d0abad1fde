//! Plugin settings and the host settings store.
//!
//! Every piece of persistent state lives in a key-value store owned by the
//! host application. This includes the settings blob, the cached access
//! token and instance URL, and the field mapping. [`SettingsStore`] is the
//! seam to that store. [`MemoryStore`] is a process-local implementation.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Option name of the settings blob.
pub const SETTINGS_OPTION: &str = "openid_connect_generic_settings";

/// Option name of the cached access token.
pub const ACCESS_TOKEN_OPTION: &str = "communityhub_sync_access_token";

/// Option name of the cached Salesforce instance URL.
pub const INSTANCE_URL_OPTION: &str = "communityhub_sync_instance_url";

/// Option name of the field mapping table.
pub const FIELD_MAPPING_OPTION: &str = "openid_connect_generic_salesforce_field_mapping";

/// Errors that can occur while loading or storing settings.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to read a settings file from disk.
    #[error("Failed to read settings file at {path}: {source}")]
    ReadSettings {
        /// Path to the settings file that failed to read.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse a settings or mapping JSON value.
    #[error("Failed to parse {option}: {source}")]
    ParseSettings {
        /// Option name (or file path) that held the bad value.
        option: String,
        #[source]
        source: serde_json::Error,
    },
    /// Failed to serialize a value for storage.
    #[error("Failed to serialize {option}: {source}")]
    SerializeSettings {
        /// Option name that was being written.
        option: String,
        #[source]
        source: serde_json::Error,
    },
    /// The host store reported an error.
    #[error("Settings store error: {0}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to acquire lock on the in-memory store.
    #[error("Failed to acquire lock on settings store")]
    LockError,
}

/// Host key-value store for named configuration blobs.
///
/// Implementations must treat a missing option as `Ok(None)`.
pub trait SettingsStore: Send + Sync {
    /// Returns the value stored under `name`, if any.
    fn get_option(&self, name: &str) -> Result<Option<Value>, Error>;

    /// Stores `value` under `name`, replacing any previous value.
    fn set_option(&self, name: &str, value: Value) -> Result<(), Error>;

    /// Returns the option as a non-empty string.
    fn get_string(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(match self.get_option(name)? {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        })
    }
}

/// In-memory [`SettingsStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    options: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get_option(&self, name: &str) -> Result<Option<Value>, Error> {
        let options = self.options.read().map_err(|_| Error::LockError)?;
        Ok(options.get(name).cloned())
    }

    fn set_option(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut options = self.options.write().map_err(|_| Error::LockError)?;
        options.insert(name.to_string(), value);
        Ok(())
    }
}

/// Community Hub sync settings.
///
/// This is a subset of the host's settings blob. Unknown keys are ignored, so
/// the struct can be read straight out of a larger plugin configuration. The
/// older `nimble_`-prefixed key names are accepted as aliases. A blob holding
/// both the current and the legacy name of one field fails to parse with a
/// duplicate field error.
///
/// All five credential fields must be present and non-empty before a token
/// can be requested.
///
/// # Examples
///
/// ```
/// use communityhub_sync::settings::Settings;
///
/// let settings: Settings = serde_json::from_str(r#"{
///     "sync_enabled": "1",
///     "login_url": "https://login.salesforce.com/services/oauth2/token",
///     "client_id": "3MVG9...",
///     "client_secret": "secret",
///     "username": "integration@example.com",
///     "password": "password+token"
/// }"#).unwrap();
/// assert!(settings.sync_enabled);
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Whether user events should trigger a sync.
    #[serde(
        default,
        alias = "nimble_sync_enabled",
        deserialize_with = "deserialize_flag"
    )]
    pub sync_enabled: bool,
    /// Full URL of the OAuth2 token endpoint.
    #[serde(
        default,
        alias = "nimble_login_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub login_url: Option<String>,
    /// Connected App consumer key.
    #[serde(
        default,
        alias = "nimble_client_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_id: Option<String>,
    /// Connected App consumer secret.
    #[serde(
        default,
        alias = "nimble_client_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<String>,
    /// Integration user name.
    #[serde(
        default,
        alias = "nimble_username",
        skip_serializing_if = "Option::is_none"
    )]
    pub username: Option<String>,
    /// Integration user password, with the security token appended if the
    /// org requires one.
    #[serde(
        default,
        alias = "nimble_password",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<String>,
}

impl Settings {
    /// Loads settings from the host store.
    ///
    /// A missing blob yields default settings (sync disabled, no credentials).
    pub fn from_store(store: &dyn SettingsStore) -> Result<Self, Error> {
        match store.get_option(SETTINGS_OPTION)? {
            Some(value) => serde_json::from_value(value).map_err(|source| Error::ParseSettings {
                option: SETTINGS_OPTION.to_string(),
                source,
            }),
            None => Ok(Self::default()),
        }
    }

    /// Loads settings from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadSettings {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| Error::ParseSettings {
            option: path.display().to_string(),
            source,
        })
    }

    /// Writes these settings into the host store.
    pub fn save(&self, store: &dyn SettingsStore) -> Result<(), Error> {
        let value = serde_json::to_value(self).map_err(|source| Error::SerializeSettings {
            option: SETTINGS_OPTION.to_string(),
            source,
        })?;
        store.set_option(SETTINGS_OPTION, value)
    }
}

/// Accepts the loose truthy values a form-backed settings blob may hold.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "0" | "false" | "off" | "no"
        ),
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    })
}
