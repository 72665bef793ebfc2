//! HTTP client for the session service.
//!
//! `SessionClient` wraps the tRPC transport with typed session operations
//! plus the two-phase signed-URL blob upload, which lives outside the tRPC
//! surface as plain REST endpoints.

pub mod rpc;

use std::sync::Arc;

use reqwest::StatusCode;
use serde::Serialize;
use tether_protocol::{
    BlobKind, CreateSessionRequest, ForkSessionRequest, Session, SessionUpdate,
    ShareSessionResponse, SignedUploadRequest, SignedUploadResponse, UpdateSessionRequest,
};
use thiserror::Error;
use tracing::debug;

use crate::auth::validate_token_shape;
use crate::providers::TokenSource;

pub use rpc::RpcClient;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no bearer token available")]
    MissingToken,

    #[error("failed to obtain bearer token: {0}")]
    TokenSource(String),

    #[error("rpc {procedure} returned {status}: {detail}")]
    Rpc {
        procedure: String,
        status: StatusCode,
        detail: String,
    },

    #[error("getSignedUploadUrl failed")]
    SignedUploadUrl,

    #[error("uploadBlob failed: upload to signed URL returned {0}")]
    SignedUpload(StatusCode),

    #[error("blob download returned {0}")]
    BlobDownload(StatusCode),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether this failure might be caused by a stale or revoked token.
    /// Used to decide when cached token validity should be dropped.
    pub fn is_possibly_auth(&self) -> bool {
        match self {
            ClientError::Rpc { status, .. } => rpc::is_auth_status(*status),
            ClientError::MissingToken | ClientError::SignedUploadUrl => true,
            _ => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Serialize)]
struct GetSessionInput<'a> {
    session_id: &'a str,
    include_blob_urls: bool,
}

#[derive(Serialize)]
struct UpdateSessionInput<'a> {
    session_id: &'a str,
    #[serde(flatten)]
    update: &'a UpdateSessionRequest,
}

#[derive(Serialize)]
struct SessionIdInput<'a> {
    session_id: &'a str,
}

/// Typed client for session CRUD, sharing, forking, token checks and blob
/// transfer against one service base URL.
pub struct SessionClient {
    rpc: RpcClient,
    http: reqwest::Client,
    token_source: Arc<dyn TokenSource>,
}

impl SessionClient {
    pub fn new(base_url: String, token_source: Arc<dyn TokenSource>) -> Self {
        let http = reqwest::Client::new();
        Self {
            rpc: RpcClient::new(http.clone(), base_url, Arc::clone(&token_source)),
            http,
            token_source,
        }
    }

    pub fn base_url(&self) -> &str {
        self.rpc.base_url()
    }

    pub async fn create_session(&self, request: &CreateSessionRequest) -> ClientResult<Session> {
        self.rpc.mutate("session.create", request).await
    }

    pub async fn get_session(
        &self,
        session_id: &str,
        include_blob_urls: bool,
    ) -> ClientResult<Session> {
        self.rpc
            .query(
                "session.get",
                &GetSessionInput {
                    session_id,
                    include_blob_urls,
                },
            )
            .await
    }

    pub async fn update_session(
        &self,
        session_id: &str,
        update: &UpdateSessionRequest,
    ) -> ClientResult<SessionUpdate> {
        self.rpc
            .mutate("session.update", &UpdateSessionInput { session_id, update })
            .await
    }

    pub async fn share_session(&self, session_id: &str) -> ClientResult<ShareSessionResponse> {
        self.rpc
            .mutate("session.share", &SessionIdInput { session_id })
            .await
    }

    pub async fn fork_session(&self, request: &ForkSessionRequest) -> ClientResult<Session> {
        self.rpc.mutate("session.fork", request).await
    }

    /// Checks whether the current token is accepted by the service.
    ///
    /// Structurally malformed tokens short-circuit to `false` without any
    /// network traffic. Otherwise the service's user endpoint is the
    /// authority: any non-2xx answer means invalid.
    pub async fn token_valid(&self) -> ClientResult<bool> {
        let Some(token) = self
            .token_source
            .token()
            .await
            .map_err(|err| ClientError::TokenSource(err.to_string()))?
        else {
            return Ok(false);
        };

        if !validate_token_shape(&token) {
            debug!("token failed structural validation, skipping remote check");
            return Ok(false);
        }

        let url = format!("{}/api/user", self.base_url());
        let response = self.http.get(&url).bearer_auth(&token).send().await?;
        Ok(response.status().is_success())
    }

    /// Uploads one blob with the two-phase signed-URL flow: request a
    /// signed URL for the declared content length, then PUT the body to it.
    /// Returns the server-assigned `updated_at` for the upload.
    pub async fn upload_blob(
        &self,
        session_id: &str,
        kind: BlobKind,
        content: &str,
    ) -> ClientResult<String> {
        let token = self.rpc.bearer_token().await?;
        let url = format!("{}/api/upload-cli-session-blob-v2", self.base_url());
        let request = SignedUploadRequest {
            session_id: session_id.to_string(),
            blob_type: kind,
            content_length: content.len() as u64,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::SignedUploadUrl);
        }
        let signed: SignedUploadResponse = response.json().await?;

        let put = self
            .http
            .put(&signed.signed_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(content.to_string())
            .send()
            .await?;
        if !put.status().is_success() {
            return Err(ClientError::SignedUpload(put.status()));
        }

        debug!(session_id, blob = %kind, bytes = content.len(), "blob uploaded");
        Ok(signed.updated_at)
    }

    /// Fetches blob content from a signed download URL. These URLs carry
    /// their own authorization, so no bearer header is attached.
    pub async fn fetch_blob(&self, url: &str) -> ClientResult<String> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::BlobDownload(response.status()));
        }
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_classification() {
        let unauthorized = ClientError::Rpc {
            procedure: "session.update".to_string(),
            status: StatusCode::UNAUTHORIZED,
            detail: String::new(),
        };
        assert!(unauthorized.is_possibly_auth());

        let not_found = ClientError::Rpc {
            procedure: "session.get".to_string(),
            status: StatusCode::NOT_FOUND,
            detail: String::new(),
        };
        assert!(!not_found.is_possibly_auth());

        assert!(ClientError::MissingToken.is_possibly_auth());
        assert!(!ClientError::BlobDownload(StatusCode::BAD_GATEWAY).is_possibly_auth());
    }

    #[test]
    fn test_update_input_flattens_fields() {
        let update = UpdateSessionRequest {
            title: Some("hi".to_string()),
            ..Default::default()
        };
        let input = UpdateSessionInput {
            session_id: "s1",
            update: &update,
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["title"], "hi");
    }
}
