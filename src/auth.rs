//! ==============================================================================
//! auth.rs - delegated account provider
//! ==============================================================================
//!
//! purpose:
//!     sign-up / sign-in / sign-out against the backend's auth endpoints.
//!     the display name travels in the per-user metadata bag (`username`).
//!     provider error text is passed back verbatim.
//!
//! wire surface:
//!     POST {base}/auth/v1/signup                       {email, password, data}
//!     POST {base}/auth/v1/token?grant_type=password    {email, password}
//!     POST {base}/auth/v1/logout                       Bearer {access_token}
//!
//! ==============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AuthError;

/// an account as returned by the provider
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    /// `user_metadata.username`
    pub display_name: Option<String>,
    #[serde(skip)]
    pub access_token: Option<String>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<AuthUser, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    async fn sign_out(&self, user: &AuthUser) -> Result<(), AuthError>;
}

#[derive(Debug, Clone)]
pub struct SupabaseAuth {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SupabaseAuth {
    pub fn new(base_url: &str, api_key: &str, timeout: Option<Duration>) -> Result<Self, AuthError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(api_key)
                .map_err(|e| AuthError::TransportFailure(format!("invalid api key header: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| AuthError::TransportFailure(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn post(&self, path: &str, bearer: &str, body: Option<Value>) -> Result<Value, AuthError> {
        let mut request = self
            .client
            .post(format!("{}/auth/v1/{}", self.base_url, path))
            .bearer_auth(bearer);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AuthError::TransportFailure(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::TransportFailure(e.to_string()))?;
        debug!(path, status = status.as_u16(), "auth response");

        if !status.is_success() {
            warn!(path, status = status.as_u16(), "auth request rejected");
            return Err(AuthError::Rejected(provider_message(&text)));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| AuthError::Rejected(format!("unexpected auth response: {e}")))
    }
}

/// the provider's own wording, whichever field it used
fn provider_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}

/// accepts both `{user: {...}, access_token}` and a bare user object
fn parse_user(payload: &Value) -> Result<AuthUser, AuthError> {
    let user = payload.get("user").filter(|u| u.is_object()).unwrap_or(payload);
    let id = user
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::Rejected("auth response carried no user".to_string()))?;

    Ok(AuthUser {
        id: id.to_string(),
        email: user.get("email").and_then(Value::as_str).map(str::to_string),
        display_name: user
            .pointer("/user_metadata/username")
            .and_then(Value::as_str)
            .map(str::to_string),
        access_token: payload.get("access_token").and_then(Value::as_str).map(str::to_string),
    })
}

#[async_trait]
impl AuthProvider for SupabaseAuth {
    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<AuthUser, AuthError> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "data": { "username": display_name },
        });
        let payload = self.post("signup", &self.api_key, Some(body)).await?;
        parse_user(&payload)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let payload = self.post("token?grant_type=password", &self.api_key, Some(body)).await?;
        parse_user(&payload)
    }

    async fn sign_out(&self, user: &AuthUser) -> Result<(), AuthError> {
        let Some(token) = user.access_token.as_deref() else {
            return Ok(());
        };
        self.post("logout", token, None).await.map(|_| ())
    }
}
