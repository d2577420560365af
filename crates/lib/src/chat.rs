//! Chat bridge to the assistant, which can mutate tasks server-side.
//!
//! The bridge does not go through the task store's write path, so after
//! every successful send it signals the store directly and lets the views
//! refetch. The invalidation is deliberately coarse: the bridge cannot know
//! whether the assistant touched tasks, so it always signals.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::{ApiClient, ApiError};
use crate::credentials::{CredentialKey, CredentialStore};
use crate::tasks::TaskStore;

/// Reply text marking that the server wiped the conversation history.
/// Matched case-insensitively as a substring.
const HISTORY_CLEARED_SIGNAL: &str = "history cleared";

/// One transcript entry (role is "user" or "assistant").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Relays messages to the assistant endpoint and keeps the local transcript
/// and conversation id in line with what the server reports.
pub struct ChatBridge {
    api: Arc<ApiClient>,
    store: CredentialStore,
    tasks: Arc<TaskStore>,
    conversation_id: Option<String>,
    transcript: Vec<ChatMessage>,
}

impl ChatBridge {
    /// Picks up the persisted conversation id, if any.
    pub fn new(api: Arc<ApiClient>, store: CredentialStore, tasks: Arc<TaskStore>) -> Self {
        let conversation_id = store.read(CredentialKey::ConversationId);
        Self {
            api,
            store,
            tasks,
            conversation_id,
            transcript: Vec::new(),
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// Restore the transcript from the server for the persisted
    /// conversation. Without a stored id this is a no-op.
    pub async fn load_history(&mut self) -> Result<(), ApiError> {
        let Some(id) = self.conversation_id.clone() else {
            return Ok(());
        };
        self.transcript = self.api.chat_history(&id).await?;
        log::debug!("restored {} chat messages", self.transcript.len());
        Ok(())
    }

    /// Send one message and return the assistant's reply text.
    ///
    /// When the reply carries the history-cleared signal, the transcript and
    /// the stored conversation id are wiped; otherwise the reply is appended
    /// and the returned conversation id persisted for the next call. Either
    /// way the task store is signaled afterwards.
    pub async fn send(&mut self, message: &str) -> Result<String, ApiError> {
        self.transcript.push(ChatMessage::user(message));
        let reply = self
            .api
            .chat(message, self.conversation_id.as_deref())
            .await?;

        if reply
            .response
            .to_lowercase()
            .contains(HISTORY_CLEARED_SIGNAL)
        {
            log::info!("server cleared the conversation history");
            self.transcript.clear();
            self.conversation_id = None;
            if let Err(e) = self.store.clear(CredentialKey::ConversationId) {
                log::warn!("clearing stored conversation id failed: {}", e);
            }
        } else {
            self.transcript
                .push(ChatMessage::assistant(reply.response.as_str()));
            if self.conversation_id.as_deref() != Some(reply.conversation_id.as_str()) {
                if let Err(e) = self
                    .store
                    .write(CredentialKey::ConversationId, &reply.conversation_id)
                {
                    log::warn!("persisting conversation id failed: {}", e);
                }
            }
            self.conversation_id = Some(reply.conversation_id);
        }

        // The assistant may have mutated tasks; let the views refetch.
        self.tasks.mark_changed();
        Ok(reply.response)
    }
}
