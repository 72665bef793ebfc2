//! Working-tree snapshot and restore via the `git` CLI.
//!
//! Snapshot capture produces a [`GitState`] describing the remote URL, the
//! current HEAD, the branch (when not detached) and a unified diff of the
//! working tree including untracked files. Restore replays such a state on
//! top of an existing clone. Both sides shell out to `git` rather than
//! linking a git library, so behavior matches whatever git the user runs.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tether_protocol::{GitRestoreState, GitState, MAX_GIT_PATCH_BYTES};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs git in `workdir` and returns trimmed stdout, failing with stderr
/// attached when git exits non-zero.
async fn git(workdir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Like [`git`] but keeps stdout byte-exact. Diff output must not be
/// trimmed or the final hunk loses its trailing newline.
async fn git_raw(workdir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn first_remote_url(workdir: &Path) -> Option<String> {
    let remotes = git(workdir, &["remote"]).await.ok()?;
    let name = remotes.lines().next()?.trim().to_string();
    if name.is_empty() {
        return None;
    }
    if let Ok(url) = git(workdir, &["remote", "get-url", &name]).await {
        return Some(url);
    }
    git(workdir, &["remote", "get-url", "--push", &name])
        .await
        .ok()
}

async fn current_branch(workdir: &Path) -> Option<String> {
    let reference = git(workdir, &["symbolic-ref", "--quiet", "HEAD"]).await.ok()?;
    Some(
        reference
            .strip_prefix("refs/heads/")
            .unwrap_or(&reference)
            .to_string(),
    )
}

/// True when HEAD is the root commit (`rev-list --parents` yields only the
/// commit's own hash, no parent hashes).
async fn head_is_root_commit(workdir: &Path) -> bool {
    match git(workdir, &["rev-list", "--parents", "-n", "1", "HEAD"]).await {
        Ok(line) => line.split_whitespace().count() == 1,
        Err(_) => false,
    }
}

fn null_device() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}

/// Snapshots the working tree at `workdir`.
///
/// Returns `None` when the directory is not a git repository or has no
/// commits yet. Untracked files are made visible to the diff with a
/// transient intent-to-add, reverted unconditionally afterwards so the
/// index is left untouched. Patches over [`MAX_GIT_PATCH_BYTES`] are
/// dropped with a warning rather than failing the snapshot.
pub async fn capture_git_state(workdir: &Path) -> Result<Option<GitState>> {
    let head = match git(workdir, &["rev-parse", "HEAD"]).await {
        Ok(head) => head,
        Err(err) => {
            debug!(workdir = %workdir.display(), error = %err, "no git state to capture");
            return Ok(None);
        }
    };

    let repo_url = first_remote_url(workdir).await;
    let branch = current_branch(workdir).await;

    let untracked = git(workdir, &["ls-files", "--others", "--exclude-standard"])
        .await
        .unwrap_or_default();
    let untracked: Vec<&str> = untracked.lines().filter(|l| !l.is_empty()).collect();

    if !untracked.is_empty() {
        let mut args = vec!["add", "--intent-to-add", "--"];
        args.extend(untracked.iter().copied());
        if let Err(err) = git(workdir, &args).await {
            warn!(error = %err, "intent-to-add of untracked files failed");
        }
    }

    let diff_result = git_raw(workdir, &["diff", "HEAD"]).await;

    // The index must be restored whether or not the diff succeeded.
    if !untracked.is_empty()
        && let Err(err) = git(workdir, &["reset"]).await
    {
        warn!(error = %err, "failed to reset intent-to-add entries");
    }

    let mut patch = diff_result.context("diffing working tree against HEAD")?;

    if patch.trim().is_empty() && head_is_root_commit(workdir).await {
        let empty_tree = git(workdir, &["hash-object", "-t", "tree", null_device()]).await?;
        patch = git_raw(workdir, &["diff", &empty_tree]).await?;
    }

    if patch.len() > MAX_GIT_PATCH_BYTES {
        warn!(
            bytes = patch.len(),
            limit = MAX_GIT_PATCH_BYTES,
            "working tree patch exceeds size limit, dropping it"
        );
        patch = String::new();
    }

    Ok(Some(GitState {
        repo_url,
        head,
        branch,
        patch,
    }))
}

async fn stash_count(workdir: &Path) -> usize {
    match git(workdir, &["stash", "list"]).await {
        Ok(list) => list.lines().filter(|l| !l.is_empty()).count(),
        Err(_) => 0,
    }
}

/// Replays a previously captured state onto the working tree at `workdir`.
///
/// Best effort by design: stash, checkout, apply and pop each run inside
/// their own failure boundary, log their outcome, and never prevent the
/// following phase from running. A partially restored tree is more useful
/// than none.
pub async fn execute_git_restore(workdir: &Path, state: &GitRestoreState) {
    // Phase 1: stash local work. A no-op stash must not trigger a pop.
    let before = stash_count(workdir).await;
    let stashed = match git(workdir, &["stash"]).await {
        Ok(_) => {
            let after = stash_count(workdir).await;
            after > before
        }
        Err(err) => {
            warn!(error = %err, "stash before restore failed");
            false
        }
    };

    // Phase 2: reach the target commit.
    match git(workdir, &["rev-parse", "HEAD"]).await {
        Ok(current) if current == state.head => {
            debug!(head = %state.head, "already at target commit, skipping checkout");
        }
        Ok(_) => {
            let mut checked_out = false;
            if let Some(branch) = &state.branch {
                let tip = git(workdir, &["rev-parse", branch.as_str()]).await;
                if matches!(&tip, Ok(tip) if *tip == state.head) {
                    match git(workdir, &["checkout", branch.as_str()]).await {
                        Ok(_) => {
                            info!(branch = %branch, "checked out branch");
                            checked_out = true;
                        }
                        Err(err) => warn!(branch = %branch, error = %err, "branch checkout failed"),
                    }
                }
            }
            if !checked_out {
                match git(workdir, &["checkout", state.head.as_str()]).await {
                    Ok(_) => info!(head = %state.head, "checked out commit (detached)"),
                    Err(err) => warn!(head = %state.head, error = %err, "commit checkout failed"),
                }
            }
        }
        Err(err) => warn!(error = %err, "could not resolve current HEAD"),
    }

    // Phase 3: apply the patch from a temp file. The temp directory is
    // removed on drop and removal errors are swallowed.
    if state.patch.is_empty() {
        debug!("no patch to apply");
    } else {
        match tempfile::tempdir() {
            Ok(dir) => {
                let patch_path = dir.path().join("restore.patch");
                match tokio::fs::write(&patch_path, &state.patch).await {
                    Ok(()) => {
                        let patch_arg = patch_path.to_string_lossy().into_owned();
                        match git(workdir, &["apply", &patch_arg]).await {
                            Ok(_) => info!(bytes = state.patch.len(), "patch applied"),
                            Err(err) => warn!(error = %err, "patch apply failed"),
                        }
                    }
                    Err(err) => warn!(error = %err, "could not write patch file"),
                }
            }
            Err(err) => warn!(error = %err, "could not create temp directory for patch"),
        }
    }

    // Phase 4: pop only what phase 1 actually stashed.
    if stashed {
        match git(workdir, &["stash", "pop"]).await {
            Ok(_) => debug!("stash popped"),
            Err(err) => warn!(error = %err, "stash pop failed, local work remains stashed"),
        }
    }
}

#[derive(Serialize)]
struct GitStateHashInput<'a> {
    head: &'a str,
    patch: &'a str,
    branch: &'a Option<String>,
}

/// Change-detection key for a git state: SHA-256 over the canonical JSON
/// of head, patch and branch, hex encoded. An absent branch and an empty
/// branch name serialize differently and therefore hash differently.
pub fn hash_git_state(state: &GitState) -> String {
    let input = GitStateHashInput {
        head: &state.head,
        patch: &state.patch,
        branch: &state.branch,
    };
    // Field order is fixed by the struct definition.
    let json = serde_json::to_string(&input).unwrap_or_default();
    hex::encode(Sha256::digest(json.as_bytes()))
}
