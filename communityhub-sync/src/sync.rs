//! Account sync triggered by OpenID Connect user events.
//!
//! Sync never surfaces errors to its caller. Every failure is logged and
//! reported as a skipped sync (`false` / `None`).

use crate::client;
use crate::mapping::FieldMapping;
use crate::rest::{Account, RestClient};
use crate::settings::{self, FIELD_MAPPING_OPTION};
use crate::user::{self, User, UserStore, REMOTE_ACCOUNT_ID_META};
use serde_json::Value;
use std::sync::Arc;

/// Errors while applying a mapping.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Loading the field mapping failed.
    #[error("Failed to load field mapping: {source}")]
    Mapping {
        #[source]
        source: settings::Error,
    },
    /// Writing user meta failed.
    #[error("Failed to update user {user_id}: {source}")]
    UserStore {
        /// Host id of the user being updated.
        user_id: u64,
        #[source]
        source: user::Error,
    },
}

/// A user passed to [`AccountSync::sync_user_data`], either loaded or by id.
#[derive(Debug, Clone)]
pub enum UserRef {
    /// An already loaded user.
    User(User),
    /// A user id to look up in the user store.
    Id(u64),
}

impl From<User> for UserRef {
    fn from(user: User) -> Self {
        UserRef::User(user)
    }
}

impl From<u64> for UserRef {
    fn from(id: u64) -> Self {
        UserRef::Id(id)
    }
}

/// Returns true if the `sync_enabled` setting is on.
///
/// Unreadable settings count as disabled. This includes a blob that holds
/// both `sync_enabled` and the legacy `nimble_sync_enabled`.
pub fn is_sync_enabled(client: &client::Client) -> bool {
    match client.settings() {
        Ok(settings) => settings.sync_enabled,
        Err(error) => {
            tracing::warn!(%error, "cannot read settings, treating sync as disabled");
            false
        }
    }
}

/// Copies Salesforce Account fields into host user meta.
///
/// # Example
///
/// ```no_run
/// use communityhub_sync::client;
/// use communityhub_sync::rest::RestClient;
/// use communityhub_sync::settings::MemoryStore;
/// use communityhub_sync::sync::AccountSync;
/// use communityhub_sync::user::MemoryUserStore;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let auth_client = client::Builder::new()
///     .store(Arc::new(MemoryStore::new()))
///     .build()?;
/// let users = Arc::new(MemoryUserStore::new());
///
/// if let Some(sync) = AccountSync::new(RestClient::new(auth_client), users).register() {
///     sync.on_existing_user_link(42).await;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AccountSync {
    rest: RestClient,
    users: Arc<dyn UserStore>,
    mapping_option: String,
}

impl std::fmt::Debug for AccountSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSync")
            .field("rest", &self.rest)
            .field("mapping_option", &self.mapping_option)
            .finish_non_exhaustive()
    }
}

impl AccountSync {
    /// Creates a sync using the default field mapping option.
    pub fn new(rest: RestClient, users: Arc<dyn UserStore>) -> Self {
        Self {
            rest,
            users,
            mapping_option: FIELD_MAPPING_OPTION.to_string(),
        }
    }

    /// Reads the field mapping from `option_name` instead of the default.
    pub fn with_mapping_option(mut self, option_name: impl Into<String>) -> Self {
        self.mapping_option = option_name.into();
        self
    }

    /// Returns the REST client.
    pub fn rest_client(&self) -> &RestClient {
        &self.rest
    }

    /// Returns the sync if it is enabled in settings, so the host can attach it
    /// to its user events.
    pub fn register(self) -> Option<Self> {
        if is_sync_enabled(self.rest.auth_client()) {
            Some(self)
        } else {
            tracing::debug!("account sync disabled; not registering handlers");
            None
        }
    }

    /// Handler for a newly created user.
    pub async fn on_user_create(&self, user: User) -> bool {
        self.sync_user_data(user).await
    }

    /// Handler for an existing user that was linked to an OpenID account.
    pub async fn on_existing_user_link(&self, user_id: u64) -> bool {
        self.sync_user_data(user_id).await
    }

    /// Handler for a user updated from the current claim.
    pub async fn on_user_update(&self, user: User) -> bool {
        self.sync_user_data(user).await
    }

    /// Syncs a user's profile from their Salesforce Account.
    ///
    /// Returns true once the account was fetched and the mapping applied, even
    /// if no field matched. Returns false when sync was skipped.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn sync_user_data(&self, user: impl Into<UserRef>) -> bool {
        let Some(mut user) = self.load_user(user.into()) else {
            return false;
        };

        let Some(account_id) = self.resolve_account_id(&mut user).await else {
            tracing::debug!(user_id = user.id, "no Salesforce account for user, skipping sync");
            return false;
        };

        let account = match self.rest.get_account(&account_id).await {
            Ok(account) => account,
            Err(error) => {
                tracing::warn!(user_id = user.id, %account_id, %error, "failed to fetch account");
                return false;
            }
        };

        match self.apply_mapping(&mut user, &account) {
            Ok(updated) => {
                tracing::info!(user_id = user.id, %account_id, updated, "user synced");
                true
            }
            Err(error) => {
                tracing::warn!(user_id = user.id, %error, "failed to apply field mapping");
                false
            }
        }
    }

    fn load_user(&self, user: UserRef) -> Option<User> {
        match user {
            UserRef::User(user) => Some(user),
            UserRef::Id(id) => match self.users.get_user(id) {
                Ok(Some(user)) => Some(user),
                Ok(None) => {
                    tracing::debug!(user_id = id, "user not found");
                    None
                }
                Err(error) => {
                    tracing::warn!(user_id = id, %error, "failed to load user");
                    None
                }
            },
        }
    }

    /// Returns the user's Salesforce Account id, querying for it if not cached.
    ///
    /// The cached id is returned with no network call. Otherwise the Salesforce
    /// User id is taken from the subject identity and its AccountId is queried.
    /// A found id is cached on `user` and in the user store.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all, fields(user_id = user.id)))]
    pub async fn resolve_account_id(&self, user: &mut User) -> Option<String> {
        if let Some(account_id) = user.remote_account_id() {
            return Some(account_id.to_string());
        }

        let remote_user_id = user.remote_user_id()?.to_string();
        let account_id = match self.rest.account_id_for_user(&remote_user_id).await {
            Ok(Some(account_id)) => account_id,
            Ok(None) => {
                tracing::debug!(%remote_user_id, "Salesforce user has no account");
                return None;
            }
            Err(error) => {
                tracing::warn!(%remote_user_id, %error, "account lookup failed");
                return None;
            }
        };

        user.meta.insert(
            REMOTE_ACCOUNT_ID_META.to_string(),
            Value::String(account_id.clone()),
        );
        if let Err(error) =
            self.users
                .update_meta(user.id, REMOTE_ACCOUNT_ID_META, Value::String(account_id.clone()))
        {
            tracing::warn!(user_id = user.id, %error, "failed to cache account id");
        }
        Some(account_id)
    }

    /// Writes mapped account fields into user meta and returns how many were
    /// written.
    ///
    /// Fields with no value on the account are left untouched. Fields are
    /// written one at a time in mapping order. If the store fails partway, the
    /// fields written before the failure stay persisted and the error is
    /// returned.
    pub fn apply_mapping(&self, user: &mut User, account: &Account) -> Result<usize, Error> {
        let mapping = FieldMapping::load(self.rest.auth_client().store().as_ref(), &self.mapping_option)
            .map_err(|source| Error::Mapping { source })?;

        let mut updated = 0;
        for (local_key, value) in mapping.mapped_values(account) {
            self.users
                .update_meta(user.id, local_key, value.clone())
                .map_err(|source| Error::UserStore {
                    user_id: user.id,
                    source,
                })?;
            user.meta.insert(local_key.to_string(), value.clone());
            updated += 1;
        }
        Ok(updated)
    }
}
