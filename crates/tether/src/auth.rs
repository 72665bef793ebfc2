//! Token shape validation and cached validity checks.
//!
//! Tokens are JWT-shaped but never signature-verified on this side: the
//! client only checks structure locally (to avoid pointless network calls
//! with a token the service is guaranteed to reject) and asks the service
//! itself for the authoritative answer.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::client::SessionClient;
use crate::providers::TokenSource;

/// Claims the service requires in every token payload.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    user_id: String,
    #[allow(dead_code)]
    version: f64,
    /// Expiry in seconds since the epoch, optional.
    #[serde(default)]
    exp: Option<i64>,
}

/// Local, no-network structural validation of a bearer token.
///
/// Requires three dot-separated base64url segments, a JSON payload with a
/// non-empty string user-id claim and a numeric version claim, and - when
/// an expiry is present - an expiry in the future.
pub fn validate_token_shape(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|segment| segment.is_empty()) {
        return false;
    }

    let Ok(payload) = URL_SAFE_NO_PAD.decode(segments[1].trim_end_matches('=')) else {
        return false;
    };

    let Ok(claims) = serde_json::from_slice::<TokenClaims>(&payload) else {
        return false;
    };

    if claims.user_id.is_empty() {
        return false;
    }

    if let Some(exp) = claims.exp
        && exp <= chrono::Utc::now().timestamp()
    {
        return false;
    }

    true
}

/// Caches token validity keyed by the literal token string, so token
/// rotation naturally invalidates the cache. Performs exactly one remote
/// check per distinct token value until explicitly invalidated.
pub struct TokenValidator {
    client: Arc<SessionClient>,
    token_source: Arc<dyn TokenSource>,
    cache: RwLock<HashMap<String, bool>>,
}

impl TokenValidator {
    pub fn new(client: Arc<SessionClient>, token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            token_source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `None` when no token is currently obtainable (callers skip
    /// the cycle), otherwise the cached or freshly checked validity.
    pub async fn is_valid(&self) -> Result<Option<bool>> {
        let Some(token) = self.token_source.token().await? else {
            return Ok(None);
        };

        {
            let cache = self.cache.read().await;
            if let Some(&valid) = cache.get(&token) {
                return Ok(Some(valid));
            }
        }

        // A transport failure leaves validity indeterminate; it is not
        // cached so the next cycle re-checks.
        let valid = match self.client.token_valid().await {
            Ok(valid) => valid,
            Err(err) => {
                debug!(error = %err, "token check unreachable, validity indeterminate");
                return Ok(None);
            }
        };
        debug!(valid, "token validity checked against service");

        let mut cache = self.cache.write().await;
        cache.insert(token, valid);
        Ok(Some(valid))
    }

    /// Drops all cached verdicts, forcing re-validation on the next cycle.
    /// Called after sync failures that might be auth-related.
    pub async fn invalidate_cache(&self) {
        self.cache.write().await.clear();
    }
}
