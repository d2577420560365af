//! Authenticated session: identity ownership, token lifecycle, and the
//! Initializing/Anonymous/Authenticated state machine.
//!
//! The session manager is the only writer of the user identity, the
//! credential store's token key, the token mirror, and the API client's
//! token slot. Views observe the state through a watch channel and must not
//! show protected content before the state settles (see `guard`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::api::{ApiClient, ApiError};
use crate::credentials::{CredentialKey, CredentialStore};

/// Authenticated user as `/auth/me` returns it. Always replaced wholesale
/// from a server response, never patched field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Where the session stands. Starts Initializing; settles to Anonymous or
/// Authenticated once the stored token has been checked.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Initializing,
    Anonymous,
    Authenticated(User),
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    /// True once restore has run (or a login/logout has happened).
    pub fn is_settled(&self) -> bool {
        !matches!(self, SessionState::Initializing)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Rejected client-side, before any network call.
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Owns the user identity and the token lifecycle across the credential
/// store, the token mirror, and the API client.
///
/// Login/signup are not deduplicated here; callers must not fire a second
/// attempt while one is in flight (the CLI is sequential, so this holds).
pub struct SessionManager {
    api: Arc<ApiClient>,
    store: CredentialStore,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(api: Arc<ApiClient>, store: CredentialStore) -> Self {
        let (state, _) = watch::channel(SessionState::Initializing);
        Self { api, store, state }
    }

    /// Current state (cloned snapshot).
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Observe state transitions (route guard, task views).
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user().cloned()
    }

    /// Try to restore a session from the stored token and settle the state.
    /// No stored token => Anonymous. A token the server rejects (or a
    /// transport failure while checking it) is purged from the store, the
    /// mirror, and the client before settling on Anonymous.
    pub async fn restore(&self) -> SessionState {
        let Some(token) = self.store.read(CredentialKey::SessionToken) else {
            self.state.send_replace(SessionState::Anonymous);
            return self.state();
        };
        self.api.set_token(&token);
        match self.api.me().await {
            Ok(user) => {
                log::info!("session restored for {}", user.email);
                self.state.send_replace(SessionState::Authenticated(user));
            }
            Err(e) => {
                log::warn!("stored token rejected, clearing session: {}", e);
                self.purge_token();
                self.state.send_replace(SessionState::Anonymous);
            }
        }
        self.state()
    }

    /// Log in. On success the token is persisted to all three locations and
    /// the identity is replaced from the response. On failure nothing is
    /// touched: a failed attempt never logs out an existing session.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "email and password are required".to_string(),
            ));
        }
        let auth = self.api.login(email, password).await?;
        self.persist_token(&auth.access_token);
        self.state
            .send_replace(SessionState::Authenticated(auth.user.clone()));
        log::info!("logged in as {}", auth.user.email);
        Ok(auth.user)
    }

    /// Create an account and log in. The password confirmation is checked
    /// here, before any network call.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<User, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "email and password are required".to_string(),
            ));
        }
        if password != confirm_password {
            return Err(AuthError::Validation("passwords do not match".to_string()));
        }
        let auth = self.api.register(email, password).await?;
        self.persist_token(&auth.access_token);
        self.state
            .send_replace(SessionState::Authenticated(auth.user.clone()));
        log::info!("registered and logged in as {}", auth.user.email);
        Ok(auth.user)
    }

    /// Purge the token from all three locations, clear the identity, and
    /// settle on Anonymous.
    pub fn logout(&self) {
        self.purge_token();
        self.state.send_replace(SessionState::Anonymous);
        log::info!("logged out");
    }

    /// A call elsewhere reported Unauthorized: tear the session down so the
    /// UI cannot keep an authenticated look over a dead token. Same effect
    /// as logout.
    pub fn handle_unauthorized(&self) {
        log::warn!("server rejected the session token mid-use; logging out");
        self.purge_token();
        self.state.send_replace(SessionState::Anonymous);
    }

    fn persist_token(&self, token: &str) {
        if let Err(e) = self.store.write(CredentialKey::SessionToken, token) {
            log::warn!("persisting session token failed: {}", e);
        }
        if let Err(e) = self.store.write_token_mirror(token) {
            log::warn!("persisting token mirror failed: {}", e);
        }
        self.api.set_token(token);
    }

    fn purge_token(&self) {
        if let Err(e) = self.store.clear(CredentialKey::SessionToken) {
            log::warn!("clearing stored session token failed: {}", e);
        }
        if let Err(e) = self.store.clear_token_mirror() {
            log::warn!("clearing token mirror failed: {}", e);
        }
        self.api.clear_token();
    }
}
