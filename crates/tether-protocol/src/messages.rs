//! UI message log entries.
//!
//! Message logs arrive as JSON arrays written by whichever client produced
//! them. Entries are validated here at the parse boundary; entries that do
//! not match a known shape are ignored rather than failing the whole log.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of a session's UI message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiMessage {
    /// Agent- or user-authored output line.
    Say {
        /// Sub-kind, e.g. "text", "checkpoint_saved", "error".
        say: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        /// Unix milliseconds.
        #[serde(default)]
        ts: i64,
        /// Client-specific extras, preserved round-trip.
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    /// Question posed to the user.
    Ask {
        ask: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default)]
        ts: i64,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

impl UiMessage {
    /// Whether this entry is a checkpoint marker. Checkpoint markers are
    /// local bookkeeping and are filtered out of restored message logs.
    pub fn is_checkpoint(&self) -> bool {
        matches!(self, UiMessage::Say { say, .. } if say == "checkpoint_saved")
    }

    /// The user's own prompt text, when this entry is a user-authored
    /// message.
    pub fn user_text(&self) -> Option<&str> {
        match self {
            UiMessage::Say { say, text, .. } if say == "text" => text.as_deref(),
            _ => None,
        }
    }
}

/// Parses a UI message log, dropping entries that do not match a known
/// shape.
pub fn parse_ui_messages(raw: &str) -> Vec<UiMessage> {
    let Ok(values) = serde_json::from_str::<Vec<Value>>(raw) else {
        return Vec::new();
    };

    values
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect()
}
