use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;

use crate::error::ApiError;
use crate::model::{Credentials, GeoSample, LocationSubmission, UserId, UserSummary};
use crate::registration::RegistrationRequest;
use crate::token::token_from_set_cookie;

/// Result of a successful login or registration.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthOutcome {
    /// Session token taken from the first `Set-Cookie` header, if the server sent one
    pub token: Option<String>,
    pub body: Value,
}

/// SenseSafe backend endpoints.
#[async_trait]
pub trait SenseSafeApi: Send + Sync {
    /// `POST /auth/register`
    async fn register(&self, request: &RegistrationRequest) -> Result<AuthOutcome, ApiError>;

    /// `POST /auth/login`
    async fn login(&self, credentials: &Credentials) -> Result<AuthOutcome, ApiError>;

    /// `GET /r/parent/{parentId}/patients`
    async fn parent_patients(&self, parent_id: &UserId) -> Result<Vec<UserSummary>, ApiError>;

    /// `GET /r/patient/{patientId}/parents`
    async fn patient_parents(&self, patient_id: &UserId) -> Result<Vec<UserSummary>, ApiError>;

    /// `GET /location/latest/{patientId}`
    async fn latest_location(&self, patient_id: &UserId) -> Result<GeoSample, ApiError>;

    /// `POST /location`
    async fn submit_location(&self, submission: &LocationSubmission) -> Result<(), ApiError>;
}

/// HTTP client for the SenseSafe backend
///
/// # Session
/// - Login/registration responses carry the session in `Set-Cookie`
/// - Every later request sends it back as `Cookie: <cookie_name>=<token>`
///
/// # Error Handling
/// - Transport failures (connect, timeout): `ApiError::Transport`
/// - Non-2xx status: `ApiError::Rejected` with the server's message
/// - Unexpected body: `ApiError::Decode`
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    cookie_name: String,
    token: RwLock<Option<String>>,
}

impl HttpApi {
    pub fn new(base_url: &str, cookie_name: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("SenseSafe/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        HttpApi {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie_name: cookie_name.to_string(),
            token: RwLock::new(None),
        }
    }

    /// Attach (or clear) the session token sent with every request.
    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_session(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.token.read().ok().and_then(|t| t.clone());
        match token {
            Some(token) => request.header(COOKIE, format!("{}={}", self.cookie_name, token)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = self.with_session(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = rejection_message(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        log::debug!("[api] {} rejected: {}", status.as_u16(), message);
        Err(ApiError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(self.client.get(self.url(path))).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(format!("{path}: {e}")))
    }

    async fn authenticate<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<AuthOutcome, ApiError> {
        let response = self.send(self.client.post(self.url(path)).json(body)).await?;

        let token = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .next()
            .and_then(token_from_set_cookie);
        if token.is_none() {
            log::warn!("[api] {path} succeeded without a session cookie");
        }

        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok(AuthOutcome { token, body })
    }
}

#[async_trait]
impl SenseSafeApi for HttpApi {
    async fn register(&self, request: &RegistrationRequest) -> Result<AuthOutcome, ApiError> {
        self.authenticate("/auth/register", request).await
    }

    async fn login(&self, credentials: &Credentials) -> Result<AuthOutcome, ApiError> {
        self.authenticate("/auth/login", credentials).await
    }

    async fn parent_patients(&self, parent_id: &UserId) -> Result<Vec<UserSummary>, ApiError> {
        self.get_json(&format!("/r/parent/{parent_id}/patients")).await
    }

    async fn patient_parents(&self, patient_id: &UserId) -> Result<Vec<UserSummary>, ApiError> {
        self.get_json(&format!("/r/patient/{patient_id}/parents")).await
    }

    async fn latest_location(&self, patient_id: &UserId) -> Result<GeoSample, ApiError> {
        self.get_json(&format!("/location/latest/{patient_id}")).await
    }

    async fn submit_location(&self, submission: &LocationSubmission) -> Result<(), ApiError> {
        self.send(self.client.post(self.url("/location")).json(submission))
            .await
            .map(|_| ())
    }
}

/// Human-readable message from an error response body.
///
/// Prefers a `message` field, then a per-field error object
/// (`field: a, b` lines), then a JSON string, then the raw text.
pub fn rejection_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => {
            if let Some(Value::String(message)) = map.get("message") {
                return Some(message.clone());
            }
            let lines: Vec<String> = map
                .iter()
                .map(|(field, value)| match value {
                    Value::Array(items) => {
                        let joined: Vec<String> = items.iter().map(plain_text).collect();
                        format!("{field}: {}", joined.join(", "))
                    }
                    other => format!("{field}: {}", plain_text(other)),
                })
                .collect();
            if lines.is_empty() {
                None
            } else {
                Some(lines.join("\n"))
            }
        }
        Ok(Value::String(message)) => Some(message),
        _ => Some(trimmed.to_string()),
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
