//! Session title generation.
//!
//! Runs at most once per session: once a title is known locally or
//! remotely, nothing happens. The title is summarized from the first
//! user-authored message by a completion provider, with plain truncation
//! of that message as the fallback whenever the provider misbehaves.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tether_protocol::{UiMessage, UpdateSessionRequest};
use tracing::{debug, info, warn};

use crate::client::SessionClient;
use crate::providers::CompletionProvider;
use crate::sync::state::SessionStateManager;

pub const MAX_TITLE_CHARS: usize = 140;

pub struct TitleService {
    client: Arc<SessionClient>,
    completion: Arc<dyn CompletionProvider>,
    timeout: Duration,
}

impl TitleService {
    pub fn new(
        client: Arc<SessionClient>,
        completion: Arc<dyn CompletionProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            completion,
            timeout,
        }
    }

    /// Generates and persists a title for `session_id` unless one already
    /// exists. Persists both locally and through the session service.
    pub async fn generate_and_update_title(
        &self,
        state: &SessionStateManager,
        session_id: &str,
        messages: &[UiMessage],
    ) -> Result<()> {
        if state.title(session_id).is_some() {
            return Ok(());
        }

        // The local cache is empty after a restart even when the remote
        // session was already titled.
        if let Ok(session) = self.client.get_session(session_id, false).await
            && let Some(title) = session.title.filter(|t| !t.is_empty())
        {
            state.set_title(session_id, title);
            return Ok(());
        }

        let Some(first_message) = messages.iter().find_map(|m| m.user_text()) else {
            debug!(session_id, "no user message yet, skipping title generation");
            return Ok(());
        };
        let first_message = collapse_whitespace(first_message);
        if first_message.is_empty() {
            return Ok(());
        }

        let title = match self.summarize(&first_message).await {
            Ok(title) => title,
            Err(err) => {
                warn!(session_id, error = %err, "title completion failed, using truncation");
                truncate_title(&first_message)
            }
        };

        state.set_title(session_id, title.clone());
        let update = UpdateSessionRequest {
            title: Some(title.clone()),
            ..Default::default()
        };
        if let Err(err) = self.client.update_session(session_id, &update).await {
            warn!(session_id, error = %err, "failed to persist title remotely");
        } else {
            info!(session_id, title = %title, "session titled");
        }
        Ok(())
    }

    async fn summarize(&self, first_message: &str) -> Result<String> {
        let prompt = format!(
            "Summarize the following coding task as a session title of at \
             most {MAX_TITLE_CHARS} characters. Reply with the title only.\n\n{first_message}"
        );
        let raw = tokio::time::timeout(self.timeout, self.completion.complete(&prompt, self.timeout))
            .await??;
        let title = strip_wrapping_quotes(raw.trim()).to_string();
        if title.is_empty() {
            anyhow::bail!("completion returned an empty title");
        }
        Ok(truncate_title(&title))
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_wrapping_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|t| t.strip_suffix(quote))
        {
            return inner;
        }
    }
    text
}

/// Hard cap at [`MAX_TITLE_CHARS`] characters, replacing the tail with an
/// ellipsis when the text is too long.
fn truncate_title(text: &str) -> String {
    if text.chars().count() <= MAX_TITLE_CHARS {
        return text.to_string();
    }
    let mut title: String = text.chars().take(MAX_TITLE_CHARS - 3).collect();
    title.push_str("...");
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedCompletion {
        response: Result<String, String>,
        calls: AtomicUsize,
    }

    impl FixedCompletion {
        fn ok(text: &str) -> Self {
            Self {
                response: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: Err("provider down".to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for FixedCompletion {
        async fn complete(&self, _prompt: &str, _timeout: Duration) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(err) => anyhow::bail!("{err}"),
            }
        }
    }

    fn user_message(text: &str) -> UiMessage {
        serde_json::from_str(&format!(
            r#"{{"type":"say","say":"text","text":{},"ts":1}}"#,
            serde_json::to_string(text).unwrap()
        ))
        .unwrap()
    }

    fn service(completion: Arc<FixedCompletion>) -> TitleService {
        let client = Arc::new(SessionClient::new(
            "http://127.0.0.1:1".to_string(),
            Arc::new(crate::providers::EnvTokenSource::new("TETHER_TEST_UNSET")),
        ));
        TitleService::new(client, completion, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_existing_local_title_short_circuits() {
        let completion = Arc::new(FixedCompletion::ok("unused"));
        let state = SessionStateManager::new();
        state.set_title("s1", "already titled".to_string());

        service(Arc::clone(&completion))
            .generate_and_update_title(&state, "s1", &[user_message("hello")])
            .await
            .unwrap();

        assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.title("s1").as_deref(), Some("already titled"));
    }

    #[test]
    fn test_strip_wrapping_quotes() {
        assert_eq!(strip_wrapping_quotes("\"quoted\""), "quoted");
        assert_eq!(strip_wrapping_quotes("'quoted'"), "quoted");
        assert_eq!(strip_wrapping_quotes("\"unbalanced"), "\"unbalanced");
        assert_eq!(strip_wrapping_quotes("plain"), "plain");
    }

    #[test]
    fn test_truncate_title_caps_with_ellipsis() {
        let long = "x".repeat(200);
        let title = truncate_title(&long);
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
        assert!(title.ends_with("..."));
        assert_eq!(&title[..MAX_TITLE_CHARS - 3], &long[..MAX_TITLE_CHARS - 3]);

        let short = "short title";
        assert_eq!(truncate_title(short), short);
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(
            collapse_whitespace("  fix \n\n the \t bug  "),
            "fix the bug"
        );
    }

    #[tokio::test]
    async fn test_failing_completion_falls_back_to_truncation() {
        let completion = Arc::new(FixedCompletion::failing());
        let state = SessionStateManager::new();
        let svc = service(Arc::clone(&completion));

        // The remote lookup and update hit an unreachable address; both are
        // tolerated, the local title must still be set.
        let long = "word ".repeat(60);
        svc.generate_and_update_title(&state, "s1", &[user_message(&long)])
            .await
            .unwrap();

        let title = state.title("s1").unwrap();
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
        assert!(title.ends_with("..."));
        assert_eq!(completion.calls.load(Ordering::SeqCst), 1);
    }
}
