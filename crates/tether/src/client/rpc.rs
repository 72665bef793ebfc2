//! Minimal tRPC-shaped HTTP transport.
//!
//! Procedures live under `/api/trpc/<procedure>`. Queries are GETs with the
//! input serialized as a JSON `input` query parameter; mutations are POSTs
//! with the input as the JSON body. Responses arrive wrapped in the
//! `{"result":{"data":...}}` envelope.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tether_protocol::RpcEnvelope;
use tracing::debug;

use crate::client::{ClientError, ClientResult};
use crate::providers::TokenSource;

pub struct RpcClient {
    http: reqwest::Client,
    base_url: String,
    token_source: Arc<dyn TokenSource>,
}

impl RpcClient {
    pub fn new(http: reqwest::Client, base_url: String, token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token_source,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn bearer_token(&self) -> ClientResult<String> {
        match self.token_source.token().await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(ClientError::MissingToken),
            Err(err) => Err(ClientError::TokenSource(err.to_string())),
        }
    }

    fn procedure_url(&self, procedure: &str) -> String {
        format!("{}/api/trpc/{procedure}", self.base_url)
    }

    /// Issues a tRPC query. The input is serialized to JSON and passed as
    /// the url-encoded `input` query parameter.
    pub async fn query<I, O>(&self, procedure: &str, input: &I) -> ClientResult<O>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let token = self.bearer_token().await?;
        let input_json = serde_json::to_string(input)?;
        let url = format!(
            "{}?input={}",
            self.procedure_url(procedure),
            urlencoding::encode(&input_json)
        );
        debug!(procedure, "rpc query");

        let response = self.http.get(&url).bearer_auth(&token).send().await?;
        Self::unwrap_envelope(procedure, response).await
    }

    /// Issues a tRPC mutation. The input is sent as the JSON request body.
    pub async fn mutate<I, O>(&self, procedure: &str, input: &I) -> ClientResult<O>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let token = self.bearer_token().await?;
        let url = self.procedure_url(procedure);
        debug!(procedure, "rpc mutation");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(input)
            .send()
            .await?;
        Self::unwrap_envelope(procedure, response).await
    }

    async fn unwrap_envelope<O>(procedure: &str, response: reqwest::Response) -> ClientResult<O>
    where
        O: DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rpc {
                procedure: procedure.to_string(),
                status,
                detail: truncate_detail(&body),
            });
        }

        let envelope: RpcEnvelope<O> = response.json().await?;
        Ok(envelope.result.data)
    }
}

pub(crate) fn is_auth_status(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

fn truncate_detail(body: &str) -> String {
    const MAX: usize = 256;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}
