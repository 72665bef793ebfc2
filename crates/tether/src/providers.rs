//! Collaborator seams injected into the sync engine.
//!
//! The engine never reaches for globals: credentials, completion
//! capabilities, task storage, and task-history registration are all
//! trait objects constructed once at process start and passed in.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use tether_protocol::BlobKind;

/// Supplies the current bearer token, if one is obtainable.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns the raw token, or `None` when no credential is currently
    /// available (treated by callers as "skip this cycle", not an error).
    async fn token(&self) -> Result<Option<String>>;
}

/// A single bounded-time text completion, used for title generation.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String>;
}

/// Access to a task's on-disk conversation files.
#[async_trait]
pub trait TaskDataProvider: Send + Sync {
    /// Directory holding the task's blob files.
    fn task_dir(&self, task_id: &str) -> PathBuf;

    /// Reads one blob file's content, `None` when the file does not exist.
    async fn read_blob(&self, task_id: &str, kind: BlobKind) -> Result<Option<String>>;

    /// Writes one blob file's content, creating the task directory.
    async fn write_blob(&self, task_id: &str, kind: BlobKind, content: &str) -> Result<()>;
}

/// Suppliers for per-task agent settings and the token's organization.
pub trait SessionSettings: Send + Sync {
    fn mode(&self, task_id: &str) -> Option<String>;
    fn model(&self, task_id: &str) -> Option<String>;
    fn organization_id(&self) -> Option<String>;
}

/// Task-history registration invoked at the end of a restore.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Records the restored task and switches the active view to it.
    async fn register_restored_task(&self, task_id: &str, session_id: &str) -> Result<()>;
}

/// Token source backed by an environment variable.
pub struct EnvTokenSource {
    var: String,
}

impl EnvTokenSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenSource for EnvTokenSource {
    async fn token(&self) -> Result<Option<String>> {
        match std::env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().to_string())),
            _ => Ok(None),
        }
    }
}

/// Filesystem-backed task storage: one directory per task under a root,
/// one JSON file per blob kind.
pub struct FsTaskData {
    root: PathBuf,
}

impl FsTaskData {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl TaskDataProvider for FsTaskData {
    fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id)
    }

    async fn read_blob(&self, task_id: &str, kind: BlobKind) -> Result<Option<String>> {
        let path = self.task_dir(task_id).join(kind.file_name());
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("reading blob file {}", path.display()))
            }
        }
    }

    async fn write_blob(&self, task_id: &str, kind: BlobKind, content: &str) -> Result<()> {
        let dir = self.task_dir(task_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating task directory {}", dir.display()))?;
        let path = dir.join(kind.file_name());
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("writing blob file {}", path.display()))?;
        Ok(())
    }
}

/// Completion provider used when no model endpoint is configured. Always
/// fails, which routes title generation to its truncation fallback.
pub struct NullCompletion;

#[async_trait]
impl CompletionProvider for NullCompletion {
    async fn complete(&self, _prompt: &str, _timeout: Duration) -> Result<String> {
        anyhow::bail!("no completion provider configured")
    }
}

/// Registry used by the CLI, which has no task view to switch: restores
/// are recorded in the log only.
pub struct LogTaskRegistry;

#[async_trait]
impl TaskRegistry for LogTaskRegistry {
    async fn register_restored_task(&self, task_id: &str, session_id: &str) -> Result<()> {
        tracing::info!(task_id, session_id, "restored task registered");
        Ok(())
    }
}

/// Static settings used by the CLI: one mode/model for every task.
pub struct StaticSettings {
    pub mode: Option<String>,
    pub model: Option<String>,
    pub organization_id: Option<String>,
}

impl SessionSettings for StaticSettings {
    fn mode(&self, _task_id: &str) -> Option<String> {
        self.mode.clone()
    }

    fn model(&self, _task_id: &str) -> Option<String> {
        self.model.clone()
    }

    fn organization_id(&self) -> Option<String> {
        self.organization_id.clone()
    }
}
