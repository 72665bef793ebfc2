//! In-memory derived sync state.
//!
//! Nothing here is persisted: everything can be re-derived from the remote
//! service or the next snapshot. The timestamp high-water mark is the one
//! piece with a real invariant, it only ever moves forward.

use dashmap::DashMap;

#[derive(Debug, Default, Clone)]
struct TaskState {
    git_url: Option<String>,
    git_state_hash: Option<String>,
}

#[derive(Debug, Default, Clone)]
struct SessionState {
    mode: Option<String>,
    model: Option<String>,
    title: Option<String>,
    verified: bool,
    updated_at: Option<String>,
}

/// Per-task and per-session derived state, keyed by their ids.
#[derive(Debug, Default)]
pub struct SessionStateManager {
    tasks: DashMap<String, TaskState>,
    sessions: DashMap<String, SessionState>,
}

impl SessionStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn git_url(&self, task_id: &str) -> Option<String> {
        self.tasks.get(task_id).and_then(|s| s.git_url.clone())
    }

    pub fn set_git_url(&self, task_id: &str, url: Option<String>) {
        self.tasks.entry(task_id.to_string()).or_default().git_url = url;
    }

    pub fn git_state_hash(&self, task_id: &str) -> Option<String> {
        self.tasks
            .get(task_id)
            .and_then(|s| s.git_state_hash.clone())
    }

    pub fn set_git_state_hash(&self, task_id: &str, hash: String) {
        self.tasks
            .entry(task_id.to_string())
            .or_default()
            .git_state_hash = Some(hash);
    }

    pub fn mode(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).and_then(|s| s.mode.clone())
    }

    pub fn set_mode(&self, session_id: &str, mode: Option<String>) {
        self.sessions.entry(session_id.to_string()).or_default().mode = mode;
    }

    pub fn model(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).and_then(|s| s.model.clone())
    }

    pub fn set_model(&self, session_id: &str, model: Option<String>) {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .model = model;
    }

    pub fn title(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).and_then(|s| s.title.clone())
    }

    pub fn set_title(&self, session_id: &str, title: String) {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .title = Some(title);
    }

    /// Whether the session has been confirmed to exist remotely during
    /// this process lifetime.
    pub fn is_verified(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.verified)
            .unwrap_or(false)
    }

    pub fn mark_verified(&self, session_id: &str) {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .verified = true;
    }

    pub fn updated_at(&self, session_id: &str) -> Option<String> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.updated_at.clone())
    }

    /// Advances the last-synced timestamp for a session.
    ///
    /// Stores `value` only when no timestamp is known yet or `value` is
    /// lexicographically greater than the current one. Out-of-order upload
    /// responses therefore never regress the externally visible
    /// last-synced signal.
    pub fn update_timestamp(&self, session_id: &str, value: &str) {
        let mut entry = self.sessions.entry(session_id.to_string()).or_default();
        match &entry.updated_at {
            Some(current) if value <= current.as_str() => {}
            _ => entry.updated_at = Some(value.to_string()),
        }
    }
}
