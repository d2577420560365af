//! In-process fake of the task service for integration tests: bound on a
//! free port, primed and inspected through a shared state handle. Does not
//! require the real backend.
#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use lib::api::ApiClient;
use lib::credentials::CredentialStore;
use lib::session::SessionManager;
use lib::tasks::TaskStore;

pub type Shared = Arc<Mutex<ServerState>>;

/// Everything the fake server accepts, records, and serves.
#[derive(Default)]
pub struct ServerState {
    /// (email, password, token) tuples the login endpoint accepts.
    pub accounts: Vec<(String, String, String)>,
    /// (token, email) pairs the bearer-authenticated routes accept.
    pub valid_tokens: Vec<(String, String)>,
    /// When true, task and chat routes reject requests without a valid token.
    pub require_auth: bool,
    /// Task collection, newest first (like the real created_at desc order).
    pub tasks: Vec<Value>,
    /// Raw Authorization header seen on each GET /tasks/.
    pub list_auth_headers: Vec<Option<String>>,
    /// Number of GET /auth/me calls served.
    pub me_calls: usize,
    /// Bodies seen on POST /chat/.
    pub chat_requests: Vec<Value>,
    /// Primed replies for POST /chat/, popped in order; a default reply is
    /// served when empty.
    pub chat_replies: VecDeque<Value>,
    /// Primed transcript for GET /chat/history/{id}/.
    pub chat_history: Vec<Value>,
    /// When set, the next mutating task or chat route fails with this status.
    pub fail_next_status: Option<u16>,
    pub next_task_id: u64,
}

pub fn new_state() -> Shared {
    Arc::new(Mutex::new(ServerState::default()))
}

/// Client-side wiring against one fake server, with a throwaway profile dir.
pub struct Harness {
    pub state: Shared,
    pub creds: CredentialStore,
    pub api: Arc<ApiClient>,
    pub session: SessionManager,
    pub tasks: Arc<TaskStore>,
}

pub async fn harness() -> Harness {
    let state = new_state();
    let base = spawn_server(state.clone()).await;
    let creds = CredentialStore::new(temp_profile_dir());
    let api = Arc::new(ApiClient::new(base));
    let session = SessionManager::new(api.clone(), creds.clone());
    let tasks = Arc::new(TaskStore::new(api.clone()));
    Harness {
        state,
        creds,
        api,
        session,
        tasks,
    }
}

pub fn temp_profile_dir() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("taskmate-test-{}", uuid::Uuid::new_v4()))
}

pub fn task_json(id: &str, title: &str, completed: bool) -> Value {
    json!({
        "id": id,
        "title": title,
        "completed": completed,
        "priority": "medium",
        "createdAt": "2024-01-01T00:00:00Z",
        "updatedAt": "2024-01-01T00:00:00Z"
    })
}

pub fn user_json(id: &str, email: &str) -> Value {
    json!({ "id": id, "email": email, "created_at": "2024-01-01T00:00:00Z" })
}

/// Bind the fake service on a free port and serve it in the background.
/// Returns the base URL to point the client at.
pub async fn spawn_server(state: Shared) -> String {
    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/me", get(me))
        .route("/tasks/", get(list_tasks).post(create_task))
        .route("/tasks/:id/", put(update_task).delete(delete_task))
        .route("/tasks/:id/complete/", patch(toggle_task))
        .route("/chat/", post(chat))
        .route("/chat/history/:id/", get(chat_history))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake server");
    let base = format!("http://{}", listener.local_addr().expect("local_addr"));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    base
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|s| s.to_string())
}

fn raw_auth_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "detail": {
                "error_code": "AUTHENTICATION_ERROR",
                "detail": "Could not validate credentials"
            }
        })),
    )
        .into_response()
}

fn authorize(s: &ServerState, headers: &HeaderMap) -> Result<(), Response> {
    if !s.require_auth {
        return Ok(());
    }
    match bearer(headers) {
        Some(t) if s.valid_tokens.iter().any(|(tok, _)| tok == &t) => Ok(()),
        _ => Err(unauthorized()),
    }
}

fn take_failure(s: &mut ServerState) -> Option<Response> {
    let status = s.fail_next_status.take()?;
    Some(
        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(json!({ "detail": "primed failure" })),
        )
            .into_response(),
    )
}

async fn login(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut s = state.lock().expect("state lock");
    let email = body
        .get("email")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let password = body
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let account = s
        .accounts
        .iter()
        .find(|(e, p, _)| e == &email && p == &password)
        .cloned();
    match account {
        Some((email, _, token)) => {
            s.valid_tokens.push((token.clone(), email.clone()));
            Json(json!({
                "access_token": token,
                "token_type": "bearer",
                "user": user_json("u1", &email)
            }))
            .into_response()
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "detail": {
                    "error_code": "AUTHENTICATION_ERROR",
                    "detail": "Incorrect email or password"
                }
            })),
        )
            .into_response(),
    }
}

async fn register(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut s = state.lock().expect("state lock");
    let email = body
        .get("email")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let password = body
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if s.accounts.iter().any(|(e, _, _)| e == &email) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "Email already registered" })),
        )
            .into_response();
    }
    let token = format!("tok-{}", email);
    s.accounts.push((email.clone(), password, token.clone()));
    s.valid_tokens.push((token.clone(), email.clone()));
    Json(json!({
        "access_token": token,
        "token_type": "bearer",
        "user": user_json("u1", &email)
    }))
    .into_response()
}

async fn me(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut s = state.lock().expect("state lock");
    s.me_calls += 1;
    let entry = bearer(&headers)
        .and_then(|t| s.valid_tokens.iter().find(|(tok, _)| tok == &t).cloned());
    match entry {
        Some((_, email)) => Json(user_json("u1", &email)).into_response(),
        None => unauthorized(),
    }
}

async fn list_tasks(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut s = state.lock().expect("state lock");
    s.list_auth_headers.push(raw_auth_header(&headers));
    if let Err(r) = authorize(&s, &headers) {
        return r;
    }
    Json(s.tasks.clone()).into_response()
}

async fn create_task(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().expect("state lock");
    if let Err(r) = authorize(&s, &headers) {
        return r;
    }
    if let Some(r) = take_failure(&mut s) {
        return r;
    }
    s.next_task_id += 1;
    let task = json!({
        "id": format!("t{}", s.next_task_id),
        "title": body.get("title").cloned().unwrap_or(Value::Null),
        "description": body.get("description").cloned().unwrap_or(Value::Null),
        "completed": body.get("completed").cloned().unwrap_or(json!(false)),
        "priority": body.get("priority").cloned().unwrap_or(json!("medium")),
        "createdAt": "2024-01-01T00:00:00Z",
        "updatedAt": "2024-01-01T00:00:00Z"
    });
    s.tasks.insert(0, task.clone());
    (StatusCode::CREATED, Json(task)).into_response()
}

async fn update_task(
    Path(id): Path<String>,
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().expect("state lock");
    if let Err(r) = authorize(&s, &headers) {
        return r;
    }
    if let Some(r) = take_failure(&mut s) {
        return r;
    }
    let Some(task) = s
        .tasks
        .iter_mut()
        .find(|t| t.get("id").and_then(|v| v.as_str()) == Some(id.as_str()))
    else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Task not found" })),
        )
            .into_response();
    };
    for field in ["title", "description", "completed"] {
        if let Some(value) = body.get(field) {
            task[field] = value.clone();
        }
    }
    Json(task.clone()).into_response()
}

async fn delete_task(
    Path(id): Path<String>,
    State(state): State<Shared>,
    headers: HeaderMap,
) -> Response {
    let mut s = state.lock().expect("state lock");
    if let Err(r) = authorize(&s, &headers) {
        return r;
    }
    if let Some(r) = take_failure(&mut s) {
        return r;
    }
    let before = s.tasks.len();
    s.tasks
        .retain(|t| t.get("id").and_then(|v| v.as_str()) != Some(id.as_str()));
    if s.tasks.len() == before {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Task not found" })),
        )
            .into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn toggle_task(
    Path(id): Path<String>,
    State(state): State<Shared>,
    headers: HeaderMap,
) -> Response {
    let mut s = state.lock().expect("state lock");
    if let Err(r) = authorize(&s, &headers) {
        return r;
    }
    if let Some(r) = take_failure(&mut s) {
        return r;
    }
    let Some(task) = s
        .tasks
        .iter_mut()
        .find(|t| t.get("id").and_then(|v| v.as_str()) == Some(id.as_str()))
    else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Task not found" })),
        )
            .into_response();
    };
    let completed = task
        .get("completed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    task["completed"] = json!(!completed);
    Json(task.clone()).into_response()
}

async fn chat(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().expect("state lock");
    if let Err(r) = authorize(&s, &headers) {
        return r;
    }
    if let Some(r) = take_failure(&mut s) {
        return r;
    }
    s.chat_requests.push(body);
    let reply = s.chat_replies.pop_front().unwrap_or_else(|| {
        json!({ "response": "ok", "conversation_id": "c1", "status": "success" })
    });
    Json(reply).into_response()
}

async fn chat_history(
    Path(_id): Path<String>,
    State(state): State<Shared>,
    headers: HeaderMap,
) -> Response {
    let s = state.lock().expect("state lock");
    if let Err(r) = authorize(&s, &headers) {
        return r;
    }
    Json(s.chat_history.clone()).into_response()
}
