//! Session records and tRPC request/response shapes.

use serde::{Deserialize, Serialize};

/// Schema version this client writes. A mismatch on fetched sessions is
/// logged as a warning, never a hard failure.
pub const SESSION_VERSION: u32 = 1;

/// A remote-owned session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID assigned by the service.
    pub session_id: String,

    /// Short human title, generated from the first user message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Schema version the session was written with.
    pub version: u32,

    /// RFC 3339 creation timestamp.
    pub created_at: String,

    /// Platform identifier of the creating client (e.g. "cli", "vscode").
    pub created_on_platform: String,

    /// Remote URL of the workspace repository, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,

    /// Last agent mode the session ran in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mode: Option<String>,

    /// Last model the session ran with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_model: Option<String>,

    /// Owning organization, when the token carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// RFC 3339 timestamp of the last mutation. Returned by every
    /// mutating call; compared lexicographically (ISO-8601 sorts by time).
    pub updated_at: String,

    // -- Signed download URLs, present only when fetched with
    // `include_blob_urls: true` --
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_conversation_history_blob_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_messages_blob_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_metadata_blob_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_state_blob_url: Option<String>,
}

/// Request body for `session.create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub version: u32,
    pub created_on_platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

/// Partial update for `session.update` -- only set fields are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSessionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_model: Option<String>,
}

impl UpdateSessionRequest {
    /// Whether the update carries any field at all.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.git_url.is_none()
            && self.last_mode.is_none()
            && self.last_model.is_none()
    }
}

/// Request body for `session.fork`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkSessionRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Response from `session.share`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSessionResponse {
    pub share_url: String,
}

/// Minimal mutation acknowledgement: the service's new `updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub session_id: String,
    pub updated_at: String,
}

/// tRPC-style response envelope: `{ "result": { "data": T } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEnvelope<T> {
    pub result: RpcResult<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResult<T> {
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let raw = r#"{"result":{"data":{"session_id":"s1","updated_at":"2026-01-01T00:00:00Z"}}}"#;
        let envelope: RpcEnvelope<SessionUpdate> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.result.data.session_id, "s1");
    }

    #[test]
    fn test_session_blob_urls_optional() {
        let raw = r#"{
            "session_id": "s1",
            "version": 1,
            "created_at": "2026-01-01T00:00:00Z",
            "created_on_platform": "cli",
            "updated_at": "2026-01-01T00:00:00Z"
        }"#;
        let session: Session = serde_json::from_str(raw).unwrap();
        assert!(session.ui_messages_blob_url.is_none());
        assert!(session.title.is_none());
    }

    #[test]
    fn test_empty_update_detection() {
        assert!(UpdateSessionRequest::default().is_empty());
        let update = UpdateSessionRequest {
            last_model: Some("sonnet".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
