//! Blob kinds and the two-phase signed upload envelope.

use serde::{Deserialize, Serialize};

/// The named JSON artifacts belonging to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobKind {
    /// Raw provider conversation log.
    ApiConversationHistory,
    /// UI-facing message log.
    UiMessages,
    /// Task bookkeeping metadata.
    TaskMetadata,
    /// Workspace git snapshot.
    GitState,
}

impl BlobKind {
    /// All blob kinds, in restore-fetch order.
    pub const ALL: [BlobKind; 4] = [
        BlobKind::ApiConversationHistory,
        BlobKind::UiMessages,
        BlobKind::TaskMetadata,
        BlobKind::GitState,
    ];

    /// Wire name used in upload requests and local file stems.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobKind::ApiConversationHistory => "api_conversation_history",
            BlobKind::UiMessages => "ui_messages",
            BlobKind::TaskMetadata => "task_metadata",
            BlobKind::GitState => "git_state",
        }
    }

    /// Local file name this blob kind is stored under in a task directory.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl std::fmt::Display for BlobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BlobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_conversation_history" => Ok(BlobKind::ApiConversationHistory),
            "ui_messages" => Ok(BlobKind::UiMessages),
            "task_metadata" => Ok(BlobKind::TaskMetadata),
            "git_state" => Ok(BlobKind::GitState),
            _ => Err(format!("unknown blob kind: {}", s)),
        }
    }
}

/// Phase-one request: ask the service for a signed upload URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedUploadRequest {
    pub session_id: String,
    pub blob_type: BlobKind,
    pub content_length: u64,
}

/// Phase-one response: where to PUT the blob, and the resulting timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedUploadResponse {
    pub signed_url: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_kind_wire_names() {
        for kind in BlobKind::ALL {
            let parsed: BlobKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("conversation".parse::<BlobKind>().is_err());
    }

    #[test]
    fn test_blob_kind_serde_matches_wire_name() {
        let json = serde_json::to_string(&BlobKind::UiMessages).unwrap();
        assert_eq!(json, "\"ui_messages\"");
    }
}
