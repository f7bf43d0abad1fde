//! Example of syncing one user against a live Salesforce org.
//!
//! This example demonstrates:
//! - Configuring credentials and a field mapping
//! - Saving the mapping through the admin editor
//! - Resolving a user's Account from their OpenID subject identity
//! - Copying mapped Account fields into user meta
//!
//! Required environment variables:
//! `SALESFORCE_LOGIN_URL`, `SALESFORCE_CLIENT_ID`, `SALESFORCE_CLIENT_SECRET`,
//! `SALESFORCE_USERNAME`, `SALESFORCE_PASSWORD`, `SALESFORCE_IDENTITY`.

use communityhub_sync::admin::{MappingEditor, MappingRow, MAPPING_FIELD_NAME};
use communityhub_sync::client;
use communityhub_sync::rest::RestClient;
use communityhub_sync::settings::{MemoryStore, Settings};
use communityhub_sync::sync::AccountSync;
use communityhub_sync::user::{MemoryUserStore, User, UserStore, SUBJECT_IDENTITY_META};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = Arc::new(MemoryStore::new());
    Settings {
        sync_enabled: true,
        login_url: Some(
            env::var("SALESFORCE_LOGIN_URL")
                .unwrap_or_else(|_| "https://login.salesforce.com/services/oauth2/token".to_string()),
        ),
        client_id: Some(env::var("SALESFORCE_CLIENT_ID")?),
        client_secret: Some(env::var("SALESFORCE_CLIENT_SECRET")?),
        username: Some(env::var("SALESFORCE_USERNAME")?),
        password: Some(env::var("SALESFORCE_PASSWORD")?),
    }
    .save(&*store)?;

    // Same payload shape the admin form posts.
    let rows = vec![
        MappingRow::new("first_name", "FirstName"),
        MappingRow::new("last_name", "LastName"),
        MappingRow::new("billing_city", "BillingCity"),
        MappingRow::new("", ""),
    ];
    let mapping =
        MappingEditor::default().save(&*store, &serde_json::json!({ MAPPING_FIELD_NAME: rows }))?;
    info!("Saved mapping with {} entries", mapping.len());

    let users = Arc::new(MemoryUserStore::new());
    users.insert(User::new(1).with_meta(SUBJECT_IDENTITY_META, env::var("SALESFORCE_IDENTITY")?))?;

    let auth_client = client::Builder::new().store(store).build()?;
    let Some(sync) = AccountSync::new(RestClient::new(auth_client), users.clone()).register() else {
        info!("Sync is disabled");
        return Ok(());
    };

    let synced = sync.on_existing_user_link(1).await;
    info!("Sync completed: {synced}");

    if let Some(user) = users.get_user(1)? {
        for (key, value) in &user.meta {
            info!("{key} = {value}");
        }
    }

    Ok(())
}
