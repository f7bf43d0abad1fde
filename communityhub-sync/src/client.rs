use crate::settings::{self, Settings, SettingsStore, ACCESS_TOKEN_OPTION, INSTANCE_URL_OPTION};
use oauth2::{AccessToken, ClientId, ClientSecret, ResourceOwnerPassword, ResourceOwnerUsername, TokenUrl};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// OAuth2 grant type sent to the login endpoint.
const PASSWORD_GRANT_TYPE: &str = "password";

/// Errors that can occur during client operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Required builder parameter was not provided.
    #[error("Missing required attribute: {}", _0)]
    MissingRequiredAttribute(String),
    /// One or more API credentials are absent from the settings.
    #[error("Missing API credentials: {}", .missing.join(", "))]
    MissingCredentials {
        /// Names of the settings that are missing or empty.
        missing: Vec<&'static str>,
    },
    /// The configured login URL is not a valid URL.
    #[error("Invalid login URL: {source}")]
    InvalidLoginUrl {
        #[source]
        source: url::ParseError,
    },
    /// An endpoint could not be turned into a URL.
    #[error("Invalid endpoint URL {endpoint}: {source}")]
    InvalidEndpoint {
        /// The endpoint as passed by the caller.
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    /// A relative endpoint was requested before any instance URL was cached.
    #[error("No instance URL cached; cannot resolve relative endpoint {endpoint}")]
    MissingInstanceUrl {
        /// The relative endpoint that could not be resolved.
        endpoint: String,
    },
    /// The login endpoint answered with a non-200 status.
    #[error("Token exchange failed with status {status}")]
    TokenExchange {
        /// HTTP status returned by the login endpoint.
        status: StatusCode,
    },
    /// The login endpoint answered 200 without an access token.
    #[error("Token exchange response did not contain an access token")]
    MissingAccessToken,
    /// The access token cannot be placed in an HTTP header.
    #[error("Invalid header value: {source}")]
    InvalidHeaderValue {
        #[source]
        source: reqwest::header::InvalidHeaderValue,
    },
    /// Transport or decoding failure from the HTTP client.
    #[error("HTTP error: {source}")]
    Http {
        #[source]
        source: reqwest::Error,
    },
    /// Loading settings or reading/writing the credential cache failed.
    #[error("Settings error: {source}")]
    Settings {
        #[source]
        source: settings::Error,
    },
}

impl From<settings::Error> for Error {
    fn from(source: settings::Error) -> Self {
        Error::Settings { source }
    }
}

/// Where the client reads its [`Settings`] from.
#[derive(Debug, Clone, Default)]
pub enum SettingsFrom {
    /// Read the settings blob from the settings store on every use.
    #[default]
    Store,
    /// Load settings from a JSON file.
    Path(PathBuf),
    /// Use settings provided directly.
    Value(Settings),
}

/// The five settings required for a password-grant token exchange.
///
/// Secret values are wrapped in `oauth2` newtypes so they never show up in
/// `Debug` output.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    /// Token endpoint.
    pub token_url: TokenUrl,
    /// Connected App consumer key.
    pub client_id: ClientId,
    /// Connected App consumer secret.
    pub client_secret: ClientSecret,
    /// Integration user name.
    pub username: ResourceOwnerUsername,
    /// Integration user password.
    pub password: ResourceOwnerPassword,
}

impl ApiCredentials {
    /// Extracts the credentials from `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredentials`] naming every absent or empty
    /// field, or [`Error::InvalidLoginUrl`] if the login URL does not parse.
    pub fn from_settings(settings: &Settings) -> Result<Self, Error> {
        fn present(value: &Option<String>) -> Option<&String> {
            value.as_ref().filter(|v| !v.is_empty())
        }

        let fields = [
            ("login_url", present(&settings.login_url)),
            ("client_id", present(&settings.client_id)),
            ("client_secret", present(&settings.client_secret)),
            ("username", present(&settings.username)),
            ("password", present(&settings.password)),
        ];
        let missing: Vec<&'static str> = fields
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingCredentials { missing });
        }

        let value = |i: usize| fields[i].1.cloned().unwrap_or_default();
        Ok(Self {
            token_url: TokenUrl::new(value(0)).map_err(|source| Error::InvalidLoginUrl { source })?,
            client_id: ClientId::new(value(1)),
            client_secret: ClientSecret::new(value(2)),
            username: ResourceOwnerUsername::new(value(3)),
            password: ResourceOwnerPassword::new(value(4)),
        })
    }
}

/// Body of a successful token response. Only the two fields used are read.
#[derive(Deserialize)]
struct PasswordGrantResponse {
    #[serde(default)]
    access_token: Option<AccessToken>,
    #[serde(default)]
    instance_url: Option<String>,
}

/// A request with its URL resolved and auth headers set.
#[derive(Debug, Clone)]
pub struct AuthenticatedRequest {
    url: Url,
    headers: HeaderMap,
}

impl AuthenticatedRequest {
    /// The resolved request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Mutable access to the URL, e.g. to append query parameters.
    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    /// The `Authorization` and `Content-Type` headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Token manager and authenticated request builder for the Salesforce REST API.
///
/// The access token and instance URL are cached in the injected
/// [`SettingsStore`], not in the client. Clones and separate clients that share
/// a store therefore share one token. A cached token is reused until a caller
/// forces a refresh, usually after an `INVALID_SESSION_ID` response. Nothing
/// tracks its expiry.
///
/// # Examples
///
/// ```no_run
/// use communityhub_sync::client;
/// use communityhub_sync::settings::MemoryStore;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = client::Builder::new()
///     .store(Arc::new(MemoryStore::new()))
///     .build()?;
///
/// let request = client.request("/services/data/v46.0/sobjects/Account/001xx").await?;
/// println!("GET {}", request.url());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    /// Source of settings (store, file path or direct value).
    settings_from: SettingsFrom,
    /// Host key-value store holding settings and the credential cache.
    store: Arc<dyn SettingsStore>,
    /// Shared HTTP client for token and API requests.
    http_client: reqwest::Client,
    /// Salesforce REST API version, e.g. "46.0".
    api_version: String,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("settings_from", &self.settings_from)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Returns the settings store backing this client.
    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    /// Returns the HTTP client used for all requests.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Returns the REST API version.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Loads the current settings from the configured source.
    pub fn settings(&self) -> Result<Settings, Error> {
        Ok(match &self.settings_from {
            SettingsFrom::Store => Settings::from_store(self.store.as_ref())?,
            SettingsFrom::Path(path) => Settings::from_path(path)?,
            SettingsFrom::Value(settings) => settings.clone(),
        })
    }

    /// Returns the cached access token without touching the network.
    pub fn cached_access_token(&self) -> Result<Option<AccessToken>, Error> {
        Ok(self
            .store
            .get_string(ACCESS_TOKEN_OPTION)?
            .map(AccessToken::new))
    }

    /// Returns the cached instance URL, set by the last token exchange.
    pub fn instance_url(&self) -> Result<Option<String>, Error> {
        Ok(self.store.get_string(INSTANCE_URL_OPTION)?)
    }

    /// Returns an access token, exchanging credentials for a new one if needed.
    ///
    /// If `force` is false and a token is cached, that token is returned with no
    /// network call. Otherwise a password grant is performed against the
    /// configured login URL. The resulting token and instance URL overwrite the
    /// cached values.
    ///
    /// # Errors
    ///
    /// - Any of the five credential settings is missing ([`Error::MissingCredentials`])
    /// - The login endpoint returned a non-200 status ([`Error::TokenExchange`])
    /// - The response carried no access token ([`Error::MissingAccessToken`])
    /// - Transport or JSON decoding failed ([`Error::Http`])
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub async fn access_token(&self, force: bool) -> Result<AccessToken, Error> {
        if !force {
            if let Some(token) = self.cached_access_token()? {
                tracing::debug!("using cached access token");
                return Ok(token);
            }
        }

        let credentials = ApiCredentials::from_settings(&self.settings()?)?;
        self.exchange_password(&credentials).await
    }

    /// Performs the OAuth2 Resource Owner Password Credentials grant.
    ///
    /// The client id and secret are sent in the form body, not as HTTP Basic
    /// auth.
    async fn exchange_password(&self, credentials: &ApiCredentials) -> Result<AccessToken, Error> {
        let params = [
            ("grant_type", PASSWORD_GRANT_TYPE),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.secret().as_str()),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.secret().as_str()),
        ];

        tracing::info!(
            token_url = %credentials.token_url.as_str(),
            "requesting access token"
        );
        let response = self
            .http_client
            .post(credentials.token_url.url().clone())
            .form(&params)
            .send()
            .await
            .map_err(|source| Error::Http { source })?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(%status, "token exchange rejected");
            return Err(Error::TokenExchange { status });
        }

        let body: PasswordGrantResponse = response
            .json()
            .await
            .map_err(|source| Error::Http { source })?;

        if let Some(instance_url) = body.instance_url.filter(|url| !url.is_empty()) {
            self.store
                .set_option(INSTANCE_URL_OPTION, Value::String(instance_url))?;
        }

        let token = body
            .access_token
            .filter(|token| !token.secret().is_empty())
            .ok_or(Error::MissingAccessToken)?;
        self.store
            .set_option(ACCESS_TOKEN_OPTION, Value::String(token.secret().clone()))?;

        tracing::info!("access token issued");
        Ok(token)
    }

    /// Builds the bearer and JSON content-type headers.
    async fn auth_headers(&self, force: bool) -> Result<HeaderMap, Error> {
        let token = self.access_token(force).await?;

        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", token.secret()))
            .map_err(|source| Error::InvalidHeaderValue { source })?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Resolves an endpoint to an absolute URL.
    ///
    /// Endpoints starting with `/` are appended to the cached instance URL;
    /// anything else must already be absolute.
    pub fn resolve_endpoint(&self, endpoint: &str) -> Result<Url, Error> {
        let absolute = if endpoint.starts_with('/') {
            let instance_url = self
                .instance_url()?
                .ok_or_else(|| Error::MissingInstanceUrl {
                    endpoint: endpoint.to_string(),
                })?;
            format!("{}{}", instance_url.trim_end_matches('/'), endpoint)
        } else {
            endpoint.to_string()
        };

        Url::parse(&absolute).map_err(|source| Error::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    /// Returns the versioned REST path for `resource`,
    /// e.g. `/services/data/v46.0/sobjects/Account`.
    pub fn api_path(&self, resource: &str) -> String {
        format!(
            "/services/data/v{}/{}",
            self.api_version,
            resource.trim_start_matches('/')
        )
    }

    /// Builds an authenticated request for `endpoint`.
    ///
    /// The token is fetched before the endpoint is resolved, so the first call
    /// against an empty cache also caches the instance URL it needs.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn request(&self, endpoint: &str) -> Result<AuthenticatedRequest, Error> {
        let headers = self.auth_headers(false).await?;
        let url = self.resolve_endpoint(endpoint)?;
        Ok(AuthenticatedRequest { url, headers })
    }

    /// Replaces the request's auth headers after forcing a new token.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn refresh_headers(&self, request: &mut AuthenticatedRequest) -> Result<(), Error> {
        request.headers = self.auth_headers(true).await?;
        Ok(())
    }
}

/// Builder for constructing a [`Client`].
///
/// A settings store is required. Settings are read from the store by
/// default; use [`settings`](Self::settings) or
/// [`settings_path`](Self::settings_path) to supply them separately while the
/// store still holds the credential cache.
#[derive(Default)]
pub struct Builder {
    settings_from: Option<SettingsFrom>,
    store: Option<Arc<dyn SettingsStore>>,
    api_version: Option<String>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the settings store used for settings and the credential cache.
    pub fn store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets settings directly.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings_from = Some(SettingsFrom::Value(settings));
        self
    }

    /// Sets settings to load from a JSON file.
    ///
    /// ```json
    /// {
    ///   "sync_enabled": true,
    ///   "login_url": "https://login.salesforce.com/services/oauth2/token",
    ///   "client_id": "your_client_id",
    ///   "client_secret": "your_client_secret",
    ///   "username": "integration@example.com",
    ///   "password": "your_password"
    /// }
    /// ```
    pub fn settings_path(mut self, path: PathBuf) -> Self {
        self.settings_from = Some(SettingsFrom::Path(path));
        self
    }

    /// Sets the REST API version. Defaults to [`DEFAULT_API_VERSION`](crate::DEFAULT_API_VERSION).
    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// Sets the HTTP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the overall HTTP request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRequiredAttribute`] if no store was provided,
    /// or [`Error::Http`] if the HTTP client cannot be constructed.
    pub fn build(self) -> Result<Client, Error> {
        let store = self
            .store
            .ok_or_else(|| Error::MissingRequiredAttribute("store".to_string()))?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout.unwrap_or(Duration::from_secs(
                crate::DEFAULT_CONNECT_TIMEOUT_SECS,
            )))
            .timeout(self.request_timeout.unwrap_or(Duration::from_secs(
                crate::DEFAULT_REQUEST_TIMEOUT_SECS,
            )))
            .build()
            .map_err(|source| Error::Http { source })?;

        Ok(Client {
            settings_from: self.settings_from.unwrap_or_default(),
            store,
            http_client,
            api_version: self
                .api_version
                .unwrap_or_else(|| crate::DEFAULT_API_VERSION.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{MemoryStore, SETTINGS_OPTION};
    use serde_json::json;
    use std::env;
    use std::fs;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn full_settings(login_url: &str) -> Settings {
        Settings {
            sync_enabled: true,
            login_url: Some(login_url.to_string()),
            client_id: Some("test_client_id".to_string()),
            client_secret: Some("test_secret".to_string()),
            username: Some("user@example.com".to_string()),
            password: Some("test_password".to_string()),
        }
    }

    fn client_with(store: Arc<MemoryStore>, settings: Settings) -> Client {
        Builder::new()
            .store(store)
            .settings(settings)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_without_store() {
        let client = Builder::new().build();
        assert!(matches!(
            client,
            Err(Error::MissingRequiredAttribute(attr)) if attr == "store"
        ));
    }

    #[test]
    fn test_builder_defaults() {
        let client = Builder::new()
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();
        assert_eq!(client.api_version(), crate::DEFAULT_API_VERSION);
        assert!(matches!(client.settings_from, SettingsFrom::Store));
    }

    #[test]
    fn test_builder_api_version() {
        let client = Builder::new()
            .store(Arc::new(MemoryStore::new()))
            .api_version("58.0")
            .build()
            .unwrap();
        assert_eq!(client.api_path("sobjects/Account"), "/services/data/v58.0/sobjects/Account");
    }

    #[test]
    fn test_api_path_default_version() {
        let client = Builder::new()
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();
        assert_eq!(client.api_path("/query/"), "/services/data/v46.0/query/");
    }

    #[test]
    fn test_settings_from_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_option(SETTINGS_OPTION, json!({ "client_id": "from_store" }))
            .unwrap();
        let client = Builder::new().store(store).build().unwrap();
        assert_eq!(
            client.settings().unwrap().client_id.as_deref(),
            Some("from_store")
        );
    }

    #[test]
    fn test_settings_from_path() {
        let mut path = env::temp_dir();
        path.push(format!("client_settings_{}.json", std::process::id()));
        let _ = fs::write(&path, r#"{"client_id": "from_file"}"#);
        let client = Builder::new()
            .store(Arc::new(MemoryStore::new()))
            .settings_path(path.clone())
            .build()
            .unwrap();
        let result = client.settings();
        let _ = fs::remove_file(path);
        assert_eq!(result.unwrap().client_id.as_deref(), Some("from_file"));
    }

    #[test]
    fn test_api_credentials_all_missing() {
        let result = ApiCredentials::from_settings(&Settings::default());
        match result {
            Err(Error::MissingCredentials { missing }) => assert_eq!(
                missing,
                vec!["login_url", "client_id", "client_secret", "username", "password"]
            ),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_api_credentials_empty_counts_as_missing() {
        let mut settings = full_settings("https://login.salesforce.com/services/oauth2/token");
        settings.password = Some(String::new());
        let result = ApiCredentials::from_settings(&settings);
        assert!(matches!(
            result,
            Err(Error::MissingCredentials { missing }) if missing == vec!["password"]
        ));
    }

    #[test]
    fn test_api_credentials_invalid_login_url() {
        let settings = full_settings("login.salesforce.com");
        let result = ApiCredentials::from_settings(&settings);
        assert!(matches!(result, Err(Error::InvalidLoginUrl { .. })));
    }

    #[test]
    fn test_api_credentials_debug_hides_secrets() {
        let credentials = ApiCredentials::from_settings(&full_settings(
            "https://login.salesforce.com/services/oauth2/token",
        ))
        .unwrap();
        let debug_str = format!("{credentials:?}");
        assert!(debug_str.contains("test_client_id"));
        assert!(!debug_str.contains("test_secret"));
        assert!(!debug_str.contains("test_password"));
    }

    #[tokio::test]
    async fn test_access_token_uses_cache() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_option(ACCESS_TOKEN_OPTION, json!("cached_token"))
            .unwrap();
        // No credentials at all: a network exchange would fail.
        let client = client_with(store, Settings::default());
        let token = client.access_token(false).await.unwrap();
        assert_eq!(token.secret(), "cached_token");
    }

    #[tokio::test]
    async fn test_access_token_missing_credentials() {
        let client = client_with(Arc::new(MemoryStore::new()), Settings::default());
        let result = client.access_token(false).await;
        assert!(matches!(result, Err(Error::MissingCredentials { .. })));
    }

    #[tokio::test]
    async fn test_password_grant_caches_token_and_instance_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("client_id=test_client_id"))
            .and(body_string_contains("client_secret=test_secret"))
            .and(body_string_contains("username=user%40example.com"))
            .and(body_string_contains("password=test_password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new_token",
                "instance_url": "https://na99.salesforce.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client_with(
            store.clone(),
            full_settings(&format!("{}/services/oauth2/token", server.uri())),
        );

        let token = client.access_token(false).await.unwrap();
        assert_eq!(token.secret(), "new_token");
        assert_eq!(
            store.get_string(ACCESS_TOKEN_OPTION).unwrap().as_deref(),
            Some("new_token")
        );
        assert_eq!(
            client.instance_url().unwrap().as_deref(),
            Some("https://na99.salesforce.com")
        );
    }

    #[tokio::test]
    async fn test_access_token_twice_makes_one_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token_1",
                "instance_url": server.uri()
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with(
            Arc::new(MemoryStore::new()),
            full_settings(&format!("{}/services/oauth2/token", server.uri())),
        );
        let first = client.access_token(false).await.unwrap();
        let second = client.access_token(false).await.unwrap();
        assert_eq!(first.secret(), second.secret());
    }

    #[tokio::test]
    async fn test_forced_refresh_replaces_cached_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh_token"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store
            .set_option(ACCESS_TOKEN_OPTION, json!("stale_token"))
            .unwrap();
        store
            .set_option(INSTANCE_URL_OPTION, json!("https://kept.salesforce.com"))
            .unwrap();
        let client = client_with(
            store,
            full_settings(&format!("{}/services/oauth2/token", server.uri())),
        );

        let token = client.access_token(true).await.unwrap();
        assert_eq!(token.secret(), "fresh_token");
        assert_eq!(
            client.cached_access_token().unwrap().unwrap().secret(),
            "fresh_token"
        );
        // A response without instance_url keeps the previous one.
        assert_eq!(
            client.instance_url().unwrap().as_deref(),
            Some("https://kept.salesforce.com")
        );
    }

    #[tokio::test]
    async fn test_token_exchange_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "authentication failure"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client_with(
            store.clone(),
            full_settings(&format!("{}/services/oauth2/token", server.uri())),
        );
        let result = client.access_token(false).await;
        assert!(matches!(
            result,
            Err(Error::TokenExchange { status }) if status == StatusCode::BAD_REQUEST
        ));
        assert!(store.get_option(ACCESS_TOKEN_OPTION).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_response_without_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instance_url": "https://na99.salesforce.com"
            })))
            .mount(&server)
            .await;

        let client = client_with(
            Arc::new(MemoryStore::new()),
            full_settings(&format!("{}/services/oauth2/token", server.uri())),
        );
        let result = client.access_token(false).await;
        assert!(matches!(result, Err(Error::MissingAccessToken)));
        // The instance URL is still recorded.
        assert_eq!(
            client.instance_url().unwrap().as_deref(),
            Some("https://na99.salesforce.com")
        );
    }

    #[test]
    fn test_resolve_relative_endpoint() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_option(INSTANCE_URL_OPTION, json!("https://na99.salesforce.com/"))
            .unwrap();
        let client = client_with(store, Settings::default());
        let url = client
            .resolve_endpoint("/services/data/v46.0/sobjects/Account/001")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://na99.salesforce.com/services/data/v46.0/sobjects/Account/001"
        );
    }

    #[test]
    fn test_resolve_relative_endpoint_without_instance_url() {
        let client = client_with(Arc::new(MemoryStore::new()), Settings::default());
        let result = client.resolve_endpoint("/services/data/v46.0/query/");
        assert!(matches!(result, Err(Error::MissingInstanceUrl { .. })));
    }

    #[test]
    fn test_resolve_absolute_endpoint() {
        let client = client_with(Arc::new(MemoryStore::new()), Settings::default());
        let url = client
            .resolve_endpoint("https://other.salesforce.com/services/data")
            .unwrap();
        assert_eq!(url.host_str(), Some("other.salesforce.com"));
    }

    #[tokio::test]
    async fn test_request_sets_headers() {
        let store = Arc::new(MemoryStore::new());
        store.set_option(ACCESS_TOKEN_OPTION, json!("abc")).unwrap();
        store
            .set_option(INSTANCE_URL_OPTION, json!("https://na99.salesforce.com"))
            .unwrap();
        let client = client_with(store, Settings::default());

        let request = client.request("/services/data/v46.0/limits").await.unwrap();
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer abc"
        );
        assert!(request.headers().get(AUTHORIZATION).unwrap().is_sensitive());
        assert_eq!(
            request.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(
            request.url().as_str(),
            "https://na99.salesforce.com/services/data/v46.0/limits"
        );
    }

    #[tokio::test]
    async fn test_request_fetches_token_before_resolving_instance_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "first_token",
                "instance_url": server.uri()
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with(
            Arc::new(MemoryStore::new()),
            full_settings(&format!("{}/services/oauth2/token", server.uri())),
        );
        let request = client.request("/services/data/v46.0/limits").await.unwrap();
        assert_eq!(
            request.url().as_str(),
            format!("{}/services/data/v46.0/limits", server.uri())
        );
    }

    #[tokio::test]
    async fn test_refresh_headers_forces_new_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.set_option(ACCESS_TOKEN_OPTION, json!("stale")).unwrap();
        store.set_option(INSTANCE_URL_OPTION, json!(server.uri())).unwrap();
        let client = client_with(
            store,
            full_settings(&format!("{}/services/oauth2/token", server.uri())),
        );

        let mut request = client.request("/services/data/v46.0/limits").await.unwrap();
        assert_eq!(request.headers().get(AUTHORIZATION).unwrap(), "Bearer stale");
        client.refresh_headers(&mut request).await.unwrap();
        assert_eq!(request.headers().get(AUTHORIZATION).unwrap(), "Bearer fresh");
    }

    #[test]
    fn test_error_display_messages() {
        let error = Error::MissingRequiredAttribute("store".to_string());
        assert_eq!(error.to_string(), "Missing required attribute: store");

        let error = Error::MissingCredentials {
            missing: vec!["client_id", "password"],
        };
        assert_eq!(error.to_string(), "Missing API credentials: client_id, password");

        let error = Error::TokenExchange {
            status: StatusCode::UNAUTHORIZED,
        };
        assert_eq!(
            error.to_string(),
            "Token exchange failed with status 401 Unauthorized"
        );
    }

    #[test]
    fn test_client_debug_impl() {
        let client = client_with(Arc::new(MemoryStore::new()), Settings::default());
        let debug_str = format!("{client:?}");
        assert!(debug_str.contains("Client"));
        assert!(debug_str.contains("46.0"));
    }
}
