//! Host users and the user store seam.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// User meta key caching the Salesforce Account id.
pub const REMOTE_ACCOUNT_ID_META: &str = "remote_account_id";

/// User meta key holding the OpenID Connect subject identity.
pub const SUBJECT_IDENTITY_META: &str = "openid-connect-generic-subject-identity";

/// Errors reported by a [`UserStore`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The host store reported an error.
    #[error("User store error: {0}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
    /// The user does not exist.
    #[error("User {0} not found")]
    NotFound(u64),
    /// Failed to acquire lock on the in-memory store.
    #[error("Failed to acquire lock on user store")]
    LockError,
}

/// A host user and its metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Host user id.
    pub id: u64,
    /// User metadata by key.
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

impl User {
    /// Creates a user with no meta.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            meta: BTreeMap::new(),
        }
    }

    /// Builder-style meta setter.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Returns a non-empty string meta value.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The cached Salesforce Account id.
    pub fn remote_account_id(&self) -> Option<&str> {
        self.meta_str(REMOTE_ACCOUNT_ID_META)
    }

    /// The OpenID Connect subject identity.
    pub fn subject_identity(&self) -> Option<&str> {
        self.meta_str(SUBJECT_IDENTITY_META)
    }

    /// Salesforce User id: the last `/`-separated segment of the subject identity.
    ///
    /// `https://login.salesforce.com/id/00Dxx0000001gEREAY/005xx000001Sv6AAAS`
    /// yields `005xx000001Sv6AAAS`. An identity ending in `/` yields `None`.
    pub fn remote_user_id(&self) -> Option<&str> {
        self.subject_identity()?
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
    }
}

/// Host user store.
pub trait UserStore: Send + Sync {
    /// Returns the user with `id`, or `Ok(None)` if there is none.
    fn get_user(&self, id: u64) -> Result<Option<User>, Error>;

    /// Writes one meta value for user `id`.
    fn update_meta(&self, id: u64, key: &str, value: Value) -> Result<(), Error>;
}

/// In-memory [`UserStore`].
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<u64, User>>,
}

impl MemoryUserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn insert(&self, user: User) -> Result<(), Error> {
        let mut users = self.users.write().map_err(|_| Error::LockError)?;
        users.insert(user.id, user);
        Ok(())
    }
}

impl UserStore for MemoryUserStore {
    fn get_user(&self, id: u64) -> Result<Option<User>, Error> {
        let users = self.users.read().map_err(|_| Error::LockError)?;
        Ok(users.get(&id).cloned())
    }

    fn update_meta(&self, id: u64, key: &str, value: Value) -> Result<(), Error> {
        let mut users = self.users.write().map_err(|_| Error::LockError)?;
        let user = users.get_mut(&id).ok_or(Error::NotFound(id))?;
        user.meta.insert(key.to_string(), value);
        Ok(())
    }
}
