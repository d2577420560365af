//! Task service API client (JSON over HTTP, bearer auth).
//!
//! Every call goes through `send`, which attaches the current token and
//! classifies the response. The token slot has exactly one writer (the
//! session manager); this client never touches the credential store or any
//! other application state, so it can be pointed at a local fake server in
//! tests.

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::RwLock;

use crate::chat::ChatMessage;
use crate::session::User;
use crate::tasks::{Task, TaskDraft, TaskPatch};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401: the credential is invalid or expired. Tearing the session down
    /// is the caller's job, not this client's.
    #[error("unauthorized: please log in again")]
    Unauthorized,
    /// Any other non-2xx status. `detail` is the server's `{detail}` message
    /// when the body carried one.
    #[error("request failed ({status}): {}", .detail.as_deref().unwrap_or("no detail"))]
    RequestFailed { status: u16, detail: Option<String> },
    /// Transport-level failure: no response at all.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// 2xx whose body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Response of POST /auth/login and /auth/register.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: User,
}

/// Response of POST /chat/.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub conversation_id: String,
}

/// Client for the task service. Share via `Arc`.
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    /// Current bearer token. Single writer: the session manager.
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    /// Attach a token to all subsequent calls. Persisting it is the session
    /// manager's concern.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }

    /// Drop the in-memory token.
    pub fn clear_token(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn current_token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Issue a request and classify the response: 401 => Unauthorized,
    /// 204 or empty body => None, other non-2xx => RequestFailed with the
    /// extracted detail, 2xx => raw body text.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<String>, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(token) = self.current_token() {
            req = req.bearer_auth(token);
        }
        if let Some(ref body) = body {
            req = req.json(body);
        }
        log::debug!("api: {} {}", method, url);
        let res = req.send().await?;
        let status = res.status();
        log::debug!("api: {} from {}", status, url);
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let detail = res.text().await.ok().as_deref().and_then(extract_detail);
            return Err(ApiError::RequestFailed {
                status: status.as_u16(),
                detail,
            });
        }
        let text = res.text().await?;
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(text))
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let text = self.send(method, path, body).await?.unwrap_or_default();
        Ok(serde_json::from_str(&text)?)
    }

    async fn request_empty(&self, method: Method, path: &str) -> Result<(), ApiError> {
        self.send(method, path, None).await?;
        Ok(())
    }

    /// POST /auth/login — exchange credentials for a bearer token and user.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        self.request_json(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }

    /// POST /auth/register — create an account; returns a token and user.
    pub async fn register(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        self.request_json(
            Method::POST,
            "/auth/register",
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }

    /// GET /auth/me — the identity behind the current token.
    pub async fn me(&self) -> Result<User, ApiError> {
        self.request_json(Method::GET, "/auth/me", None).await
    }

    /// GET /tasks/ — the full collection for the current session.
    pub async fn list_tasks(&self) -> Result<Vec<Task>, ApiError> {
        self.request_json(Method::GET, "/tasks/", None).await
    }

    /// POST /tasks/ — create; the server issues id and timestamps.
    pub async fn create_task(&self, draft: &TaskDraft) -> Result<Task, ApiError> {
        self.request_json(Method::POST, "/tasks/", Some(serde_json::to_value(draft)?))
            .await
    }

    /// PUT /tasks/{id}/ — update the fields set in the patch.
    pub async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task, ApiError> {
        self.request_json(
            Method::PUT,
            &format!("/tasks/{}/", id),
            Some(serde_json::to_value(patch)?),
        )
        .await
    }

    /// DELETE /tasks/{id}/ — 204 on success.
    pub async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        self.request_empty(Method::DELETE, &format!("/tasks/{}/", id))
            .await
    }

    /// PATCH /tasks/{id}/complete/ — the server flips `completed` and
    /// returns the task.
    pub async fn toggle_task(&self, id: &str) -> Result<Task, ApiError> {
        self.request_json(Method::PATCH, &format!("/tasks/{}/complete/", id), None)
            .await
    }

    /// POST /chat/ — one assistant turn, optionally scoped to a conversation.
    pub async fn chat(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatReply, ApiError> {
        self.request_json(
            Method::POST,
            "/chat/",
            Some(json!({ "message": message, "conversation_id": conversation_id })),
        )
        .await
    }

    /// GET /chat/history/{id}/ — transcript of a conversation.
    pub async fn chat_history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        self.request_json(
            Method::GET,
            &format!("/chat/history/{}/", conversation_id),
            None,
        )
        .await
    }
}

/// Pull the server's error message out of a `{detail}` body. The backend
/// sends either a plain string or a `{error_code, detail}` object.
fn extract_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("detail")
            .and_then(|d| d.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}
