//! tether - session sync companion for AI coding agents.
//!
//! Keeps local task state (conversation blobs, metadata, git snapshots)
//! synchronized with the session service, and restores remote sessions
//! back into a local workspace.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use notify::{EventKind, RecursiveMode, Watcher};
use tracing::{info, warn};

use tether::auth::TokenValidator;
use tether::client::SessionClient;
use tether::config::{AppConfig, AppPaths, expand_str_path, load_or_init_config};
use tether::providers::{
    EnvTokenSource, FsTaskData, LogTaskRegistry, NullCompletion, StaticSettings,
};
use tether::store::SessionStore;
use tether::sync::{SessionManager, TitleService};
use tether_protocol::{BlobKind, ForkSessionRequest};

#[derive(Debug, Parser)]
#[command(name = "tether", about = "Session sync for AI coding agents", version)]
struct Cli {
    /// Path to the config file or its directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Queue every task's current blob files and drain the queue once
    Sync {
        /// Start a fresh drain even if one is already in flight
        #[arg(long)]
        force: bool,

        /// Sync only this task
        #[arg(long)]
        task: Option<String>,
    },

    /// Watch the tasks directory and sync continuously
    Watch,

    /// Restore a session into the local workspace. Without an id, the
    /// last active session is restored.
    Restore { session_id: Option<String> },

    /// Create a public share link for a session
    Share { session_id: String },

    /// Fork a session into a new one
    Fork {
        session_id: String,

        /// Title for the forked session
        #[arg(long)]
        title: Option<String>,
    },

    /// Show service, token and last-session status
    Status,

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file path
    Path,
}

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "Error: {err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let paths = AppPaths::discover(cli.config.clone())?;
    let config = load_or_init_config(&paths)?;
    paths.ensure_directories()?;
    init_logging(&cli, &config)?;

    if let Command::Config { command } = &cli.command {
        match command {
            ConfigCommand::Show => print!("{}", toml::to_string_pretty(&config)?),
            ConfigCommand::Path => println!("{}", paths.config_file.display()),
        }
        return Ok(());
    }

    let runtime = Runtime::build(&paths, &config).await?;

    match cli.command {
        Command::Sync { force, task } => {
            runtime.enqueue_existing_blobs(task.as_deref()).await?;
            let synced = runtime.manager.do_sync(force).await;
            if synced {
                println!("synced");
            } else {
                println!("nothing to sync");
            }
        }
        Command::Watch => runtime.watch(&config).await?,
        Command::Restore { session_id } => runtime.restore(session_id.as_deref()).await?,
        Command::Share { session_id } => {
            let response = runtime.manager.client().share_session(&session_id).await?;
            println!("{}", response.share_url);
        }
        Command::Fork { session_id, title } => {
            let request = ForkSessionRequest { session_id, title };
            let forked = runtime.manager.client().fork_session(&request).await?;
            println!("{}", forked.session_id);
        }
        Command::Status => runtime.status(&config).await?,
        Command::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

struct Runtime {
    manager: SessionManager,
    tasks_dir: PathBuf,
}

impl Runtime {
    async fn build(paths: &AppPaths, config: &AppConfig) -> Result<Self> {
        let token_source = Arc::new(EnvTokenSource::new(config.auth.token_env.clone()));
        let client = Arc::new(SessionClient::new(
            config.service.base_url.clone(),
            token_source.clone(),
        ));
        let validator = TokenValidator::new(Arc::clone(&client), token_source);

        let title = TitleService::new(
            Arc::clone(&client),
            Arc::new(NullCompletion),
            Duration::from_secs(config.sync.title_timeout_secs),
        );

        let store = SessionStore::new(&paths.store_path()).await?;
        let tasks_dir = paths.tasks_dir(config)?;
        let task_data = Arc::new(FsTaskData::new(tasks_dir.clone()));
        let settings = Arc::new(StaticSettings {
            mode: config.agent.mode.clone(),
            model: config.agent.model.clone(),
            organization_id: config.agent.organization_id.clone(),
        });

        let workdir = match &config.sync.workdir {
            Some(dir) => expand_str_path(dir)?,
            None => std::env::current_dir().context("resolving current directory")?,
        };

        let manager = SessionManager::new(
            client,
            validator,
            title,
            store,
            task_data,
            settings,
            Arc::new(LogTaskRegistry),
            workdir,
            "cli".to_string(),
        );

        Ok(Self { manager, tasks_dir })
    }

    /// Queues the on-disk blob files of every task (or one task) so a
    /// one-shot sync picks up the current state.
    async fn enqueue_existing_blobs(&self, only_task: Option<&str>) -> Result<()> {
        let mut task_ids = Vec::new();
        match only_task {
            Some(task_id) => task_ids.push(task_id.to_string()),
            None => {
                let mut entries = match tokio::fs::read_dir(&self.tasks_dir).await {
                    Ok(entries) => entries,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                    Err(err) => {
                        return Err(err).with_context(|| {
                            format!("reading tasks directory {}", self.tasks_dir.display())
                        });
                    }
                };
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_dir()
                        && let Some(name) = entry.file_name().to_str()
                    {
                        task_ids.push(name.to_string());
                    }
                }
            }
        }

        for task_id in task_ids {
            for kind in BlobKind::ALL {
                let path = self.tasks_dir.join(&task_id).join(kind.file_name());
                if path.exists() {
                    self.manager.handle_file_update(&task_id, kind).await;
                }
            }
        }
        Ok(())
    }

    /// Watches the tasks directory, draining the queue on the flush
    /// threshold, on a periodic tick, and once more on shutdown.
    async fn watch(&self, config: &AppConfig) -> Result<()> {
        tokio::fs::create_dir_all(&self.tasks_dir)
            .await
            .with_context(|| format!("creating tasks directory {}", self.tasks_dir.display()))?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })
        .context("creating file watcher")?;
        watcher
            .watch(&self.tasks_dir, RecursiveMode::Recursive)
            .with_context(|| format!("watching {}", self.tasks_dir.display()))?;

        info!(dir = %self.tasks_dir.display(), "watching for task file changes");
        let mut ticker =
            tokio::time::interval(Duration::from_secs(config.sync.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down, forcing a final sync");
                    self.manager.do_sync(true).await;
                    break;
                }
                _ = ticker.tick() => {
                    self.manager.do_sync(false).await;
                }
                Some(event) = rx.recv() => match event {
                    Ok(event) => self.handle_fs_event(event).await,
                    Err(err) => warn!(error = %err, "file watcher error"),
                },
            }
        }
        Ok(())
    }

    async fn handle_fs_event(&self, event: notify::Event) {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        for path in event.paths {
            if let Some((task_id, kind)) = classify_blob_path(&self.tasks_dir, &path) {
                self.manager.handle_file_update(&task_id, kind).await;
            }
        }
    }

    async fn restore(&self, session_id: Option<&str>) -> Result<()> {
        match session_id {
            // Explicit restores are best effort: diagnostics go to the log
            // and a partial restore is left in place.
            Some(id) => self.manager.restore_session(id, false).await,
            // Restoring the last-session pointer propagates failure so a
            // broken pointer can be cleared instead of failing forever.
            None => {
                let Some(id) = self.manager.store().get_last_session().await? else {
                    println!("no last session recorded");
                    return Ok(());
                };
                if let Err(err) = self.manager.restore_session(&id, true).await {
                    self.manager.store().clear_last_session().await?;
                    return Err(err.context("restoring last session, pointer cleared"));
                }
                Ok(())
            }
        }
    }

    async fn status(&self, config: &AppConfig) -> Result<()> {
        println!("service:      {}", config.service.base_url);
        match self.manager.client().token_valid().await {
            Ok(true) => println!("token:        valid"),
            Ok(false) => println!("token:        invalid or missing"),
            Err(err) => println!("token:        check failed ({err})"),
        }
        match self.manager.store().get_last_session().await? {
            Some(id) => println!("last session: {id}"),
            None => println!("last session: none"),
        }
        println!("pending:      {} queued item(s)", self.manager.pending_items().await);
        Ok(())
    }
}

/// Maps a path inside the tasks directory to its task id and blob kind.
fn classify_blob_path(tasks_dir: &Path, path: &Path) -> Option<(String, BlobKind)> {
    let relative = path.strip_prefix(tasks_dir).ok()?;
    let mut components = relative.components();
    let task_id = components.next()?.as_os_str().to_str()?.to_string();
    let file_name = components.next()?.as_os_str().to_str()?;
    if components.next().is_some() {
        return None;
    }
    let stem = file_name.strip_suffix(".json")?;
    let kind: BlobKind = stem.parse().ok()?;
    Some((task_id, kind))
}

fn init_logging(cli: &Cli, config: &AppConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tether={level}")));

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(io::stderr().is_terminal())
                    .with_writer(io::stderr),
            )
            .try_init()
            .ok();
    }
    Ok(())
}
