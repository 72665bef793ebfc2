//! Canonical wire types for the Tether session sync service.
//!
//! This crate defines the records exchanged between a local agent workspace
//! and the remote session service:
//!
//! ```text
//! Local task files --[blob uploads]--> Session service <--[session fetch]-- Restore
//! ```
//!
//! ## Design principles
//!
//! 1. **Sessions are remote-owned.** The service assigns ids and `updated_at`
//!    timestamps; clients only propose content.
//! 2. **Blobs are full overwrites.** Each upload replaces that blob kind's
//!    content entirely, which is what makes retries safe.
//! 3. **Unknown payload shapes are ignored, not fatal.** Message logs are
//!    validated at the parse boundary and malformed entries are dropped.

pub mod blob;
pub mod git;
pub mod messages;
pub mod session;

pub use blob::{BlobKind, SignedUploadRequest, SignedUploadResponse};
pub use git::{GitRestoreState, GitState, MAX_GIT_PATCH_BYTES};
pub use messages::{UiMessage, parse_ui_messages};
pub use session::{
    CreateSessionRequest, ForkSessionRequest, RpcEnvelope, Session, SessionUpdate,
    ShareSessionResponse, UpdateSessionRequest, SESSION_VERSION,
};
