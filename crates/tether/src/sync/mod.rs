//! Session synchronization orchestration.
//!
//! `SessionManager` owns the pending-upload queue and the derived state,
//! and drives the drain cycle: resolve or create the remote session for
//! each queued task, push changed metadata, upload the freshest queued
//! blob contents, and upload the git snapshot when it actually changed.
//! It also drives the inverse operation, restoring a remote session into
//! the local workspace.

pub mod queue;
pub mod state;
pub mod title;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::StatusCode;
use tether_protocol::{
    BlobKind, CreateSessionRequest, GitRestoreState, GitState, SESSION_VERSION, UiMessage,
    UpdateSessionRequest, parse_ui_messages,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::TokenValidator;
use crate::client::{ClientError, ClientResult, SessionClient};
use crate::config::DISABLE_SYNC_ENV;
use crate::git;
use crate::providers::{SessionSettings, TaskDataProvider, TaskRegistry};
use crate::store::SessionStore;

pub use queue::{FLUSH_THRESHOLD, SyncQueue};
pub use state::SessionStateManager;
pub use title::TitleService;

type SyncFuture = Shared<BoxFuture<'static, bool>>;

#[derive(Default)]
struct InFlight {
    next_generation: u64,
    current: Option<(u64, SyncFuture)>,
}

struct SyncContext {
    client: Arc<SessionClient>,
    validator: TokenValidator,
    store: SessionStore,
    state: SessionStateManager,
    queue: Mutex<SyncQueue>,
    title: TitleService,
    task_data: Arc<dyn TaskDataProvider>,
    settings: Arc<dyn SessionSettings>,
    registry: Arc<dyn TaskRegistry>,
    workdir: PathBuf,
    platform: String,
}

#[derive(Clone)]
pub struct SessionManager {
    ctx: Arc<SyncContext>,
    in_flight: Arc<Mutex<InFlight>>,
}

impl SessionManager {
    pub fn new(
        client: Arc<SessionClient>,
        validator: TokenValidator,
        title: TitleService,
        store: SessionStore,
        task_data: Arc<dyn TaskDataProvider>,
        settings: Arc<dyn SessionSettings>,
        registry: Arc<dyn TaskRegistry>,
        workdir: PathBuf,
        platform: String,
    ) -> Self {
        Self {
            ctx: Arc::new(SyncContext {
                client,
                validator,
                store,
                state: SessionStateManager::new(),
                queue: Mutex::new(SyncQueue::new()),
                title,
                task_data,
                settings,
                registry,
                workdir,
                platform,
            }),
            in_flight: Arc::new(Mutex::new(InFlight::default())),
        }
    }

    pub fn client(&self) -> &Arc<SessionClient> {
        &self.ctx.client
    }

    pub fn store(&self) -> &SessionStore {
        &self.ctx.store
    }

    pub async fn pending_items(&self) -> usize {
        self.ctx.queue.lock().await.len()
    }

    /// Records a file write for a task. Triggers a drain once the queue
    /// reaches the flush threshold; smaller backlogs wait for the periodic
    /// flush.
    pub async fn handle_file_update(&self, task_id: &str, kind: BlobKind) {
        let should_flush = {
            let mut queue = self.ctx.queue.lock().await;
            queue.enqueue(task_id, kind);
            queue.should_flush()
        };
        if should_flush {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.do_sync(false).await;
            });
        }
    }

    /// Drains the queue, coalescing concurrent callers onto one in-flight
    /// cycle. With `force`, a fresh cycle is started even while another is
    /// running; forced calls are reserved for shutdown-style situations
    /// that need a guaranteed-fresh attempt.
    ///
    /// Returns whether any task was synced.
    pub async fn do_sync(&self, force: bool) -> bool {
        let fut = {
            let mut guard = self.in_flight.lock().await;
            if !force && let Some((_, fut)) = &guard.current {
                fut.clone()
            } else {
                let generation = guard.next_generation;
                guard.next_generation += 1;

                let ctx = Arc::clone(&self.ctx);
                let slot = Arc::clone(&self.in_flight);
                let fut: SyncFuture = async move {
                    let synced = sync_session(&ctx).await;
                    let mut guard = slot.lock().await;
                    // A forced sync may have replaced this entry already.
                    if matches!(guard.current, Some((g, _)) if g == generation) {
                        guard.current = None;
                    }
                    synced
                }
                .boxed()
                .shared();
                guard.current = Some((generation, fut.clone()));
                fut
            }
        };
        fut.await
    }

    /// Reconstructs a remote session locally: blob files, git state, task
    /// registration and the last-session pointer.
    ///
    /// With `rethrow_error` the failure propagates so the caller can react
    /// (restore-on-launch clears a broken pointer); without it the failure
    /// is logged and swallowed.
    pub async fn restore_session(&self, session_id: &str, rethrow_error: bool) -> Result<()> {
        match restore_session_inner(&self.ctx, session_id).await {
            Ok(()) => Ok(()),
            Err(err) if rethrow_error => Err(err),
            Err(err) => {
                warn!(session_id, error = %err, "session restore failed");
                Ok(())
            }
        }
    }
}

/// One drain cycle. Returns whether any task synced successfully.
async fn sync_session(ctx: &Arc<SyncContext>) -> bool {
    {
        let mut queue = ctx.queue.lock().await;
        if queue.is_empty() {
            return false;
        }
        if env::var_os(DISABLE_SYNC_ENV).is_some() {
            warn!(
                pending = queue.len(),
                "{DISABLE_SYNC_ENV} is set, dropping queued sync work"
            );
            queue.clear();
            return false;
        }
    }

    match ctx.validator.is_valid().await {
        Ok(Some(true)) => {}
        Ok(Some(false)) => {
            warn!("bearer token rejected, keeping queue for the next cycle");
            return false;
        }
        Ok(None) => {
            debug!("no bearer token available, skipping sync cycle");
            return false;
        }
        Err(err) => {
            warn!(error = %err, "token validation failed, skipping sync cycle");
            return false;
        }
    }

    // One snapshot per cycle, shared by every task in it.
    let git_state = match git::capture_git_state(&ctx.workdir).await {
        Ok(state) => state,
        Err(err) => {
            warn!(error = %err, "git snapshot failed, syncing without git state");
            None
        }
    };

    // The task holding the globally freshest write identifies the last
    // active session; captured before the drain mutates the queue.
    let (task_ids, last_active_task) = {
        let queue = ctx.queue.lock().await;
        (
            queue.unique_task_ids(),
            queue.last_item().map(|item| item.task_id.clone()),
        )
    };

    let mut synced_any = false;
    for task_id in task_ids {
        match sync_task(ctx, &task_id, git_state.as_ref()).await {
            Ok(session_id) => {
                synced_any = true;
                if last_active_task.as_deref() == Some(task_id.as_str())
                    && let Err(err) = ctx.store.set_last_session(&session_id).await
                {
                    warn!(
                        session_id = %session_id,
                        error = %err,
                        "failed to record last active session"
                    );
                }
            }
            Err(err) => {
                // The task's queue items stay put for a retry.
                warn!(task_id = %task_id, error = %err, "task sync failed");
                if is_auth_related(&err) {
                    ctx.validator.invalidate_cache().await;
                }
            }
        }
    }
    synced_any
}

/// Whether any cause in the error chain points at a stale or revoked
/// token, in which case the cached validity verdict must be dropped.
fn is_auth_related(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ClientError>())
        .any(ClientError::is_possibly_auth)
}

/// Syncs one task end to end, returning its remote session id.
async fn sync_task(
    ctx: &Arc<SyncContext>,
    task_id: &str,
    git_state: Option<&GitState>,
) -> Result<String> {
    let session_id = resolve_or_create_session(ctx, task_id, git_state).await?;

    push_metadata_changes(ctx, task_id, &session_id, git_state).await?;

    // Only the freshest queued content per blob kind is uploaded; older
    // queue entries are coalesced away by the timestamped removal below.
    let kinds: Vec<(BlobKind, DateTime<Utc>)> = {
        let queue = ctx.queue.lock().await;
        queue
            .blob_kinds_for_task(task_id)
            .into_iter()
            .filter_map(|kind| {
                queue
                    .last_item_for_blob(task_id, kind)
                    .map(|item| (kind, item.timestamp))
            })
            .collect()
    };

    let session_id_ref = session_id.as_str();
    let uploads = kinds.iter().map(|&(kind, timestamp)| async move {
        let content = ctx
            .task_data
            .read_blob(task_id, kind)
            .await
            .with_context(|| format!("reading {kind} blob"))?;
        match content {
            Some(content) => {
                let updated_at = ctx
                    .client
                    .upload_blob(session_id_ref, kind, &content)
                    .await?;
                Ok::<_, anyhow::Error>((kind, timestamp, Some(updated_at)))
            }
            None => {
                debug!(task_id, blob = %kind, "blob file missing, nothing to upload");
                Ok((kind, timestamp, None))
            }
        }
    });

    let mut first_error = None;
    for result in futures::future::join_all(uploads).await {
        match result {
            Ok((kind, timestamp, updated_at)) => {
                if let Some(updated_at) = updated_at {
                    ctx.state.update_timestamp(&session_id, &updated_at);
                }
                ctx.queue
                    .lock()
                    .await
                    .remove_processed_items(task_id, kind, timestamp);
            }
            Err(err) => {
                warn!(task_id, error = %err, "blob upload failed, item stays queued");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    if let Some(state) = git_state {
        upload_git_state_if_changed(ctx, task_id, &session_id, state).await?;
    }

    if ctx.state.title(&session_id).is_none()
        && let Ok(Some(raw)) = ctx.task_data.read_blob(task_id, BlobKind::UiMessages).await
    {
        let messages = parse_ui_messages(&raw);
        if let Err(err) = ctx
            .title
            .generate_and_update_title(&ctx.state, &session_id, &messages)
            .await
        {
            warn!(session_id = %session_id, error = %err, "title generation failed");
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(session_id),
    }
}

/// Maps the task to its remote session, verifying a stored mapping once
/// per process lifetime and allocating a new session when none exists or
/// the mapped one is gone.
async fn resolve_or_create_session(
    ctx: &Arc<SyncContext>,
    task_id: &str,
    git_state: Option<&GitState>,
) -> Result<String> {
    if let Some(session_id) = ctx.store.get_session_for_task(task_id).await? {
        if ctx.state.is_verified(&session_id) {
            return Ok(session_id);
        }
        match ctx.client.get_session(&session_id, false).await {
            Ok(session) => {
                if session.version != SESSION_VERSION {
                    warn!(
                        session_id = %session_id,
                        remote = session.version,
                        local = SESSION_VERSION,
                        "session schema version mismatch"
                    );
                }
                ctx.state.mark_verified(&session_id);
                ctx.state.update_timestamp(&session_id, &session.updated_at);
                if let Some(title) = session.title.filter(|t| !t.is_empty()) {
                    ctx.state.set_title(&session_id, title);
                }
                ctx.state.set_mode(&session_id, session.last_mode);
                ctx.state.set_model(&session_id, session.last_model);
                return Ok(session_id);
            }
            Err(ClientError::Rpc { status, .. }) if status == StatusCode::NOT_FOUND => {
                warn!(
                    task_id,
                    session_id = %session_id,
                    "mapped session no longer exists remotely, creating a new one"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    let request = CreateSessionRequest {
        version: SESSION_VERSION,
        created_on_platform: ctx.platform.clone(),
        git_url: git_state.and_then(|s| s.repo_url.clone()),
        last_mode: ctx.settings.mode(task_id),
        last_model: ctx.settings.model(task_id),
        organization_id: ctx.settings.organization_id(),
    };
    let session = ctx.client.create_session(&request).await?;
    info!(task_id, session_id = %session.session_id, "created remote session");

    ctx.store
        .set_session_for_task(task_id, &session.session_id)
        .await?;
    ctx.state.mark_verified(&session.session_id);
    ctx.state
        .update_timestamp(&session.session_id, &session.updated_at);
    if request.git_url.is_some() {
        ctx.state.set_git_url(task_id, request.git_url.clone());
    }
    ctx.state.set_mode(&session.session_id, request.last_mode.clone());
    ctx.state
        .set_model(&session.session_id, request.last_model.clone());
    Ok(session.session_id)
}

/// Sends a session update only when git URL, mode or model actually moved
/// since the last cycle.
async fn push_metadata_changes(
    ctx: &Arc<SyncContext>,
    task_id: &str,
    session_id: &str,
    git_state: Option<&GitState>,
) -> Result<()> {
    let git_url = git_state.and_then(|s| s.repo_url.clone());
    let mode = ctx.settings.mode(task_id);
    let model = ctx.settings.model(task_id);

    let mut update = UpdateSessionRequest::default();
    if git_url.is_some() && git_url != ctx.state.git_url(task_id) {
        update.git_url = git_url.clone();
    }
    if mode.is_some() && mode != ctx.state.mode(session_id) {
        update.last_mode = mode.clone();
    }
    if model.is_some() && model != ctx.state.model(session_id) {
        update.last_model = model.clone();
    }

    if update.is_empty() {
        return Ok(());
    }

    let ack = ctx.client.update_session(session_id, &update).await?;
    ctx.state.update_timestamp(session_id, &ack.updated_at);
    if update.git_url.is_some() {
        ctx.state.set_git_url(task_id, git_url);
    }
    if update.last_mode.is_some() {
        ctx.state.set_mode(session_id, mode);
    }
    if update.last_model.is_some() {
        ctx.state.set_model(session_id, model);
    }
    Ok(())
}

async fn upload_git_state_if_changed(
    ctx: &Arc<SyncContext>,
    task_id: &str,
    session_id: &str,
    state: &GitState,
) -> Result<()> {
    let hash = git::hash_git_state(state);
    if ctx.state.git_state_hash(task_id).as_deref() == Some(hash.as_str()) {
        debug!(task_id, "git state unchanged, skipping upload");
        return Ok(());
    }

    let body = serde_json::to_string(state).context("serializing git state")?;
    let updated_at = ctx
        .client
        .upload_blob(session_id, BlobKind::GitState, &body)
        .await?;
    ctx.state.update_timestamp(session_id, &updated_at);
    ctx.state.set_git_state_hash(task_id, hash);
    Ok(())
}

async fn restore_session_inner(ctx: &Arc<SyncContext>, session_id: &str) -> Result<()> {
    let session = ctx
        .client
        .get_session(session_id, true)
        .await
        .context("fetching session for restore")?;
    if session.version != SESSION_VERSION {
        warn!(
            session_id,
            remote = session.version,
            local = SESSION_VERSION,
            "restoring a session with a different schema version"
        );
    }

    // The restored task adopts the session id as its local task id.
    let task_id = session.session_id.clone();

    // All four blobs are fetched concurrently; one failing blob never
    // blocks the others.
    let (history, ui, metadata, git_blob) = tokio::join!(
        fetch_optional_blob(ctx, session.api_conversation_history_blob_url.as_deref()),
        fetch_optional_blob(ctx, session.ui_messages_blob_url.as_deref()),
        fetch_optional_blob(ctx, session.task_metadata_blob_url.as_deref()),
        fetch_optional_blob(ctx, session.git_state_blob_url.as_deref()),
    );

    if let Some(content) = settle(history, BlobKind::ApiConversationHistory)
        && let Err(err) = ctx
            .task_data
            .write_blob(&task_id, BlobKind::ApiConversationHistory, &content)
            .await
    {
        warn!(task_id = %task_id, error = %err, "failed to write conversation history");
    }

    if let Some(content) = settle(ui, BlobKind::UiMessages) {
        // Checkpoint markers are meaningless in a restored session.
        let messages: Vec<UiMessage> = parse_ui_messages(&content)
            .into_iter()
            .filter(|m| !m.is_checkpoint())
            .collect();
        match serde_json::to_string(&messages) {
            Ok(serialized) => {
                if let Err(err) = ctx
                    .task_data
                    .write_blob(&task_id, BlobKind::UiMessages, &serialized)
                    .await
                {
                    warn!(task_id = %task_id, error = %err, "failed to write ui messages");
                }
            }
            Err(err) => warn!(task_id = %task_id, error = %err, "failed to serialize ui messages"),
        }
    }

    if let Some(content) = settle(metadata, BlobKind::TaskMetadata)
        && let Err(err) = ctx
            .task_data
            .write_blob(&task_id, BlobKind::TaskMetadata, &content)
            .await
    {
        warn!(task_id = %task_id, error = %err, "failed to write task metadata");
    }

    if let Some(content) = settle(git_blob, BlobKind::GitState) {
        match serde_json::from_str::<GitRestoreState>(&content) {
            Ok(state) => git::execute_git_restore(&ctx.workdir, &state).await,
            Err(err) => warn!(session_id, error = %err, "git state blob is malformed"),
        }
    }

    ctx.store.set_session_for_task(&task_id, session_id).await?;
    ctx.registry
        .register_restored_task(&task_id, session_id)
        .await?;
    ctx.store.set_last_session(session_id).await?;
    info!(session_id, "session restored");
    Ok(())
}

async fn fetch_optional_blob(
    ctx: &SyncContext,
    url: Option<&str>,
) -> Option<ClientResult<String>> {
    match url {
        Some(url) => Some(ctx.client.fetch_blob(url).await),
        None => None,
    }
}

fn settle(result: Option<ClientResult<String>>, kind: BlobKind) -> Option<String> {
    match result {
        Some(Ok(content)) => Some(content),
        Some(Err(err)) => {
            warn!(blob = %kind, error = %err, "blob fetch failed during restore");
            None
        }
        None => None,
    }
}
