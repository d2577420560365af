//! Task model, the session-scoped task collection, and derived views.
//!
//! The collection mirrors the server: wholesale replace on refresh, a
//! single-element patch after each confirmed mutation, and no change ever
//! applied ahead of the server's response. Ids and timestamps are
//! server-issued; the client never makes them up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use crate::api::{ApiClient, ApiError};

/// Task priority (server vocabulary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// A task as the server returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Fields the client supplies when creating a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub completed: bool,
    pub priority: Priority,
}

/// Fields a client may change on an existing task; everything else is
/// immutable from this side. Unset fields are omitted from the request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

/// Status facet of the task view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
}

/// Layout variant of the task view. Consumed by a pure projection in the
/// CLI; carries no rendering concern itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    List,
    Grid,
}

/// Derived view: tasks whose title or description contains `query`
/// (case-insensitive), narrowed by status. Pure and deterministic; never
/// touches the source slice.
pub fn filter_tasks(tasks: &[Task], query: &str, status: StatusFilter) -> Vec<Task> {
    let needle = query.trim().to_lowercase();
    tasks
        .iter()
        .filter(|t| {
            let matches_search = needle.is_empty()
                || t.title.to_lowercase().contains(&needle)
                || t.description
                    .as_deref()
                    .map(|d| d.to_lowercase().contains(&needle))
                    .unwrap_or(false);
            let matches_status = match status {
                StatusFilter::All => true,
                StatusFilter::Active => !t.completed,
                StatusFilter::Completed => t.completed,
            };
            matches_search && matches_status
        })
        .cloned()
        .collect()
}

/// Session-scoped mirror of the server's task collection (newest first).
///
/// Every mutation is a server round trip followed by a local patch; on any
/// failure the collection is left exactly as it was. Operations are not
/// serialized per id: when two calls for the same id are in flight, the
/// last response to arrive wins locally.
pub struct TaskStore {
    api: Arc<ApiClient>,
    inner: RwLock<Vec<Task>>,
    /// Revision counter, bumped when the server-side collection may have
    /// changed outside this store's own write path.
    changed: watch::Sender<u64>,
}

impl TaskStore {
    pub fn new(api: Arc<ApiClient>) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            api,
            inner: RwLock::new(Vec::new()),
            changed,
        }
    }

    /// Current collection (cloned snapshot).
    pub async fn snapshot(&self) -> Vec<Task> {
        self.inner.read().await.clone()
    }

    /// Derived filtered view over the current collection.
    pub async fn filtered(&self, query: &str, status: StatusFilter) -> Vec<Task> {
        filter_tasks(&self.inner.read().await, query, status)
    }

    /// GET /tasks/ and replace the collection wholesale. Must run again
    /// after every login; a previous session's tasks are never reused.
    pub async fn refresh(&self) -> Result<Vec<Task>, ApiError> {
        let tasks = self.api.list_tasks().await?;
        *self.inner.write().await = tasks.clone();
        log::debug!("task collection replaced ({} tasks)", tasks.len());
        Ok(tasks)
    }

    /// Create on the server, then prepend the returned task.
    pub async fn create(&self, draft: &TaskDraft) -> Result<Task, ApiError> {
        let task = self.api.create_task(draft).await?;
        self.inner.write().await.insert(0, task.clone());
        Ok(task)
    }

    /// Update on the server, then replace the matching element by id.
    pub async fn update(&self, id: &str, patch: &TaskPatch) -> Result<Task, ApiError> {
        let task = self.api.update_task(id, patch).await?;
        let mut tasks = self.inner.write().await;
        if let Some(slot) = tasks.iter_mut().find(|t| t.id == task.id) {
            *slot = task.clone();
        }
        Ok(task)
    }

    /// Delete on the server, then drop the local element. An id with no
    /// local element is a silent no-op (idempotent cleanup).
    pub async fn remove(&self, id: &str) -> Result<(), ApiError> {
        self.api.delete_task(id).await?;
        self.inner.write().await.retain(|t| t.id != id);
        Ok(())
    }

    /// Flip completion on the server (the server computes the new value, so
    /// two racing toggles cannot double-flip locally) and replace by id.
    pub async fn toggle(&self, id: &str) -> Result<Task, ApiError> {
        let task = self.api.toggle_task(id).await?;
        let mut tasks = self.inner.write().await;
        if let Some(slot) = tasks.iter_mut().find(|t| t.id == id) {
            *slot = task.clone();
        }
        Ok(task)
    }

    /// Discard the collection. Must run on every transition away from
    /// Authenticated so a new login cannot see a previous user's tasks.
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Observe out-of-band invalidations (e.g. from the chat bridge). The
    /// value is a revision counter; react by calling `refresh`.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    /// Signal that the server-side collection may have changed outside this
    /// store's own write path. Deliberately coarse: callers signal whether
    /// or not a change actually happened, so views may over-fetch but never
    /// miss one.
    pub fn mark_changed(&self) {
        self.changed.send_modify(|rev| *rev += 1);
    }
}
