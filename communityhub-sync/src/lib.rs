//! Salesforce / Community Hub account sync for OpenID Connect users.
//!
//! When a user logs in or links an account through OpenID Connect, the host
//! calls into [`sync::AccountSync`]. It finds the user's Salesforce Account
//! and copies the configured fields into the user's metadata. A password
//! grant supplies the access token. The token is cached in the host settings
//! store and refreshed once when Salesforce reports `INVALID_SESSION_ID`.
//!
//! # Examples
//!
//! ```no_run
//! use communityhub_sync::client;
//! use communityhub_sync::rest::RestClient;
//! use communityhub_sync::settings::{MemoryStore, Settings};
//! use communityhub_sync::sync::AccountSync;
//! use communityhub_sync::user::{MemoryUserStore, User};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! Settings {
//!     sync_enabled: true,
//!     login_url: Some("https://login.salesforce.com/services/oauth2/token".to_string()),
//!     client_id: Some("...".to_string()),
//!     client_secret: Some("...".to_string()),
//!     username: Some("integration@example.com".to_string()),
//!     password: Some("...".to_string()),
//! }
//! .save(&*store)?;
//!
//! let auth_client = client::Builder::new().store(store).build()?;
//! let users = Arc::new(MemoryUserStore::new());
//!
//! if let Some(sync) = AccountSync::new(RestClient::new(auth_client), users).register() {
//!     sync.on_user_create(User::new(1)).await;
//! }
//! # Ok(())
//! # }
//! ```

/// Default Salesforce REST API version.
pub const DEFAULT_API_VERSION: &str = "46.0";

/// Default connection timeout for HTTP requests (15 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default request timeout for HTTP requests (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Settings blob, option names and the host settings store.
pub mod settings;

/// Access token management and authenticated request building.
pub mod client;

/// Salesforce REST lookups with the invalid-session retry.
pub mod rest;

/// Local-to-remote field mapping table.
pub mod mapping;

/// Field mapping admin form handling.
pub mod admin;

/// Host users and the user store.
pub mod user;

/// Account sync entry points for user events.
pub mod sync;
