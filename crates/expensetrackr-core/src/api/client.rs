//! API client for the ExpenseTrackr auth endpoints.
//!
//! Every request carries the persisted session token as a bearer credential
//! when one exists. Responses are normalized into `Result<String, ApiError>`;
//! nothing is retried here, and tokens are never persisted here either -
//! callers hand a successful token to the [`SessionStore`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::SessionStore;
use crate::validation::{LoginInput, RegisterInput};

use super::error::{ApiError, AuthOperation};

/// HTTP request timeout when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connection settings for [`ApiClient`]
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub device_name: String,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            device_name: device_name.into(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    device_name: &'a str,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
    confirm_password: &'a str,
    device_name: &'a str,
}

/// Clone is cheap - reqwest::Client and the session store are both shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    device_name: String,
    session: Arc<SessionStore>,
}

impl ApiClient {
    pub fn new(config: ApiConfig, session: Arc<SessionStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            device_name: config.device_name,
            session,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange email and password for a session token
    pub async fn login(&self, input: &LoginInput) -> Result<String, ApiError> {
        let operation = AuthOperation::Login;
        input
            .validate()
            .map_err(|errors| ApiError::InvalidInput { operation, errors })?;

        let body = LoginRequest {
            email: &input.email,
            password: &input.password,
            device_name: &self.device_name,
        };
        self.post_token(operation, &body).await
    }

    /// Create an account and return its session token
    pub async fn register(&self, input: &RegisterInput) -> Result<String, ApiError> {
        let operation = AuthOperation::Register;
        input
            .validate()
            .map_err(|errors| ApiError::InvalidInput { operation, errors })?;

        let body = RegisterRequest {
            name: &input.name,
            email: &input.email,
            password: &input.password,
            confirm_password: &input.confirm_password,
            device_name: &self.device_name,
        };
        self.post_token(operation, &body).await
    }

    /// Headers for every request: JSON content, plus the bearer token when
    /// the session store holds one.
    async fn auth_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        if let Some(token) = self.session.read().await {
            match header::HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => warn!("Stored session token is not a valid header value, sending without it"),
            }
        }
        headers
    }

    async fn post_token<B: Serialize>(
        &self,
        operation: AuthOperation,
        body: &B,
    ) -> Result<String, ApiError> {
        let url = format!("{}{}", self.base_url, operation.path());
        debug!(%operation, url = %url, "Sending auth request");

        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers().await)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(%operation, url = %url, error = %e, "Auth request did not reach the server");
                ApiError::Network(e)
            })?;

        let response = Self::check_response(operation, response).await?;
        let text = response.text().await.map_err(|e| {
            warn!(%operation, error = %e, "Failed to read auth response body");
            ApiError::Network(e)
        })?;

        let token = parse_token(operation, &text)?;
        debug!(%operation, "Auth request succeeded");
        Ok(token)
    }

    /// Check if response is successful, returning a normalized error if not.
    async fn check_response(
        operation: AuthOperation,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            %operation,
            status = status.as_u16(),
            body = %ApiError::truncate_body(&body),
            "Auth request failed"
        );
        Err(ApiError::from_status(operation, status, &body))
    }
}

/// The token arrives as a JSON string, a `{"token": ...}` object, or plain
/// text.
fn parse_token(operation: AuthOperation, body: &str) -> Result<String, ApiError> {
    let body = body.trim();
    let token = match serde_json::from_str::<Value>(body) {
        Ok(Value::String(token)) => token,
        Ok(Value::Object(object)) => match object.get("token").and_then(Value::as_str) {
            Some(token) => token.to_string(),
            None => {
                return Err(ApiError::InvalidResponse {
                    operation,
                    reason: "response object has no token".to_string(),
                })
            }
        },
        Ok(_) => {
            return Err(ApiError::InvalidResponse {
                operation,
                reason: "response is not a token".to_string(),
            })
        }
        Err(_) => body.to_string(),
    };

    if token.trim().is_empty() {
        return Err(ApiError::InvalidResponse {
            operation,
            reason: "empty token".to_string(),
        });
    }
    Ok(token)
}
