//! Client side of the record store's upload protocol
//!
//! Three operations: `login`, `initiateEulaUpload` and `completeEulaUpload`.
//! [`GraphQlUploadApi`] speaks them over HTTP; the login session is carried
//! by the client's cookie store.

use crate::error::ApiError;
use crate::types::{CompletedUpload, LoginOutcome, UploadSlot};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

/// The upload protocol as seen by the orchestrator
#[async_trait]
pub trait UploadApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, ApiError>;

    /// Create a `Pending` record for `version` and obtain a write slot
    async fn initiate_upload(&self, version: i64, content: &str) -> Result<UploadSlot, ApiError>;

    /// Mark `version` as transferred; returns its public location
    async fn complete_upload(&self, version: i64) -> Result<CompletedUpload, ApiError>;
}

const LOGIN_MUTATION: &str = r#"
mutation login($username: String!, $password: String!) {
    login(input: { username: $username, password: $password }) {
        isAuthenticated
        message
    }
}"#;

const INITIATE_MUTATION: &str = r#"
mutation initiateEulaUpload($version: Int!, $content: String!) {
    initiateEulaUpload(version: $version, content: $content) {
        url
        filePath
    }
}"#;

const COMPLETE_MUTATION: &str = r#"
mutation uploadComplete($version: Int!) {
    completeEulaUpload(version: $version) {
        version
        publicUrl
        status
    }
}"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// Upload protocol over a GraphQL endpoint
#[derive(Debug, Clone)]
pub struct GraphQlUploadApi {
    client: reqwest::Client,
    endpoint: String,
}

impl GraphQlUploadApi {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run one operation and decode `data.{field}`
    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
        field: &str,
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthenticated(format!("HTTP {}: {}", status, body)));
        }
        if status.is_server_error() {
            return Err(ApiError::Transport(format!("HTTP {}: {}", status, body)));
        }

        let parsed: GraphQlResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::Decode(format!("HTTP {}: {}", status, e)))?;

        if !parsed.errors.is_empty() {
            let message = parsed
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(classify_error_message(message));
        }

        if !status.is_success() {
            return Err(ApiError::Rejected(format!("HTTP {}: {}", status, body)));
        }

        let value = parsed
            .data
            .and_then(|mut data| data.remove(field))
            .filter(|value| !value.is_null())
            .ok_or_else(|| ApiError::Decode(format!("response has no '{}'", field)))?;

        serde_json::from_value(value).map_err(|e| ApiError::Decode(format!("{}: {}", field, e)))
    }
}

#[async_trait]
impl UploadApi for GraphQlUploadApi {
    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, ApiError> {
        self.execute(
            LOGIN_MUTATION,
            json!({ "username": username, "password": password }),
            "login",
        )
        .await
    }

    async fn initiate_upload(&self, version: i64, content: &str) -> Result<UploadSlot, ApiError> {
        self.execute(
            INITIATE_MUTATION,
            json!({ "version": version, "content": content }),
            "initiateEulaUpload",
        )
        .await
    }

    async fn complete_upload(&self, version: i64) -> Result<CompletedUpload, ApiError> {
        self.execute(
            COMPLETE_MUTATION,
            json!({ "version": version }),
            "completeEulaUpload",
        )
        .await
    }
}

/// Map a GraphQL error message onto the error taxonomy
pub fn classify_error_message(message: String) -> ApiError {
    let lower = message.to_lowercase();
    let auth_markers = ["access denied", "unauthenticated", "unauthorized", "not logged in"];
    if auth_markers.iter().any(|marker| lower.contains(marker)) {
        ApiError::Unauthenticated(message)
    } else {
        ApiError::Rejected(message)
    }
}
