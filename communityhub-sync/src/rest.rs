//! Salesforce REST lookups used by the account sync.
//!
//! Every call runs under the same protocol. An `INVALID_SESSION_ID` error on
//! the first attempt forces a new access token, and the request is sent once
//! more. A second failure is final. Any other non-200 response fails right
//! away.

use crate::client::{self, AuthenticatedRequest};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Error code Salesforce returns when the bearer token is no longer valid.
pub const INVALID_SESSION_ID: &str = "INVALID_SESSION_ID";

/// A Salesforce Account record, keyed by field API name.
pub type Account = serde_json::Map<String, Value>;

/// Errors from REST lookups.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Building or authenticating the request failed.
    #[error("Authentication error: {source}")]
    Auth {
        #[source]
        source: client::Error,
    },
    /// Transport failure while sending the request or reading the body.
    #[error("HTTP error: {source}")]
    Http {
        #[source]
        source: reqwest::Error,
    },
    /// The API answered with a non-200 status.
    #[error("Request failed with status {status}{}", .error_code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Status {
        /// Final HTTP status.
        status: StatusCode,
        /// `errorCode` of the first error in the body, if present.
        error_code: Option<String>,
    },
    /// A 200 response whose body was not JSON or had the wrong shape.
    #[error("Unexpected response body: {message}")]
    UnexpectedBody {
        /// What was wrong with the body.
        message: String,
    },
}

impl From<client::Error> for Error {
    fn from(source: client::Error) -> Self {
        Error::Auth { source }
    }
}

/// Status and decoded JSON body of one API response.
#[derive(Debug)]
struct ApiResponse {
    status: StatusCode,
    body: Option<Value>,
}

impl ApiResponse {
    /// `errorCode` of the first element of an error array body.
    fn error_code(&self) -> Option<&str> {
        self.body.as_ref()?.get(0)?.get("errorCode")?.as_str()
    }

    fn is_invalid_session(&self) -> bool {
        self.status != StatusCode::OK && self.error_code() == Some(INVALID_SESSION_ID)
    }

    fn into_json(self) -> Result<Value, Error> {
        if self.status != StatusCode::OK {
            return Err(Error::Status {
                status: self.status,
                error_code: self.error_code().map(str::to_string),
            });
        }
        self.body.ok_or_else(|| Error::UnexpectedBody {
            message: "response body is not JSON".to_string(),
        })
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    records: Vec<UserRecord>,
}

#[derive(Deserialize)]
struct UserRecord {
    #[serde(rename = "AccountId", default)]
    account_id: Option<String>,
}

/// Client for the REST lookups.
///
/// Wraps an auth [`client::Client`], which owns the token and the instance
/// URL.
///
/// # Example
///
/// ```no_run
/// use communityhub_sync::client;
/// use communityhub_sync::rest::RestClient;
/// use communityhub_sync::settings::MemoryStore;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let auth_client = client::Builder::new()
///     .store(Arc::new(MemoryStore::new()))
///     .build()?;
/// let rest = RestClient::new(auth_client);
///
/// if let Some(account_id) = rest.account_id_for_user("005xx000001Sv6AAAS").await? {
///     let account = rest.get_account(&account_id).await?;
///     println!("{:?}", account.get("Name"));
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct RestClient {
    auth_client: Arc<client::Client>,
}

impl RestClient {
    /// Creates a REST client around an auth client.
    pub fn new(auth_client: client::Client) -> Self {
        Self {
            auth_client: Arc::new(auth_client),
        }
    }

    /// Returns a reference to the authentication client.
    pub fn auth_client(&self) -> &client::Client {
        &self.auth_client
    }

    /// GETs `endpoint` and returns the decoded JSON body.
    ///
    /// # Errors
    ///
    /// - The request could not be built or authenticated ([`Error::Auth`])
    /// - The final status was not 200 ([`Error::Status`])
    /// - The 200 body was not JSON ([`Error::UnexpectedBody`])
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub async fn get(&self, endpoint: &str) -> Result<Value, Error> {
        let request = self.auth_client.request(endpoint).await?;
        self.fetch(request).await
    }

    /// Fetches an Account by id.
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub async fn get_account(&self, account_id: &str) -> Result<Account, Error> {
        let endpoint = self.auth_client.api_path("sobjects/Account/");
        let mut request = self.auth_client.request(&endpoint).await?;
        request
            .url_mut()
            .path_segments_mut()
            .map_err(|_| Error::UnexpectedBody {
                message: "instance URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .push(account_id);

        match self.fetch(request).await? {
            Value::Object(account) => Ok(account),
            other => Err(Error::UnexpectedBody {
                message: format!("expected an Account object, got {}", json_kind(&other)),
            }),
        }
    }

    /// Looks up the AccountId of a Salesforce User.
    ///
    /// Returns `Ok(None)` when the query succeeds but yields no account.
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub async fn account_id_for_user(&self, user_id: &str) -> Result<Option<String>, Error> {
        let soql = format!(
            "SELECT AccountId from User WHERE Id = '{}'",
            escape_soql_literal(user_id)
        );
        let endpoint = self.auth_client.api_path("query/");
        let mut request = self.auth_client.request(&endpoint).await?;
        request.url_mut().query_pairs_mut().append_pair("q", &soql);

        let body = self.fetch(request).await?;
        let response: QueryResponse =
            serde_json::from_value(body).map_err(|e| Error::UnexpectedBody {
                message: format!("invalid query response: {e}"),
            })?;

        Ok(response
            .records
            .into_iter()
            .next()
            .and_then(|record| record.account_id)
            .filter(|id| !id.is_empty()))
    }

    /// Sends `request`, re-sending it once after a forced token refresh if
    /// the session was reported invalid.
    async fn fetch(&self, mut request: AuthenticatedRequest) -> Result<Value, Error> {
        let response = self.execute(&request).await?;
        if !response.is_invalid_session() {
            return response.into_json();
        }

        tracing::warn!(
            url = %request.url(),
            "session invalid, refreshing access token and retrying once"
        );
        self.auth_client.refresh_headers(&mut request).await?;
        self.execute(&request).await?.into_json()
    }

    async fn execute(&self, request: &AuthenticatedRequest) -> Result<ApiResponse, Error> {
        tracing::debug!(url = %request.url(), "GET");
        let response = self
            .auth_client
            .http_client()
            .get(request.url().clone())
            .headers(request.headers().clone())
            .send()
            .await
            .map_err(|source| Error::Http { source })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|source| Error::Http { source })?;
        let body = serde_json::from_slice(&bytes).ok();
        Ok(ApiResponse { status, body })
    }
}

/// Escapes a value for use inside a single-quoted SOQL string literal.
pub fn escape_soql_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
