//! Git workspace snapshot shapes.

use serde::{Deserialize, Serialize};

/// Largest patch the service accepts. Oversized patches are dropped
/// (replaced with an empty string) rather than failing the sync.
pub const MAX_GIT_PATCH_BYTES: usize = 5 * 1024 * 1024;

/// Snapshot of a git working tree at sync time.
///
/// `branch: None` (detached HEAD or unknown) and `branch: Some("")` are
/// distinct states: they serialize differently and therefore hash
/// differently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitState {
    /// Fetch URL of the first remote, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,

    /// Commit hash of HEAD.
    pub head: String,

    /// Current branch name, absent on detached HEAD.
    #[serde(default)]
    pub branch: Option<String>,

    /// Full unified diff of the working tree against HEAD, untracked
    /// files included. Empty when the tree is clean or the patch was
    /// over [`MAX_GIT_PATCH_BYTES`].
    pub patch: String,
}

/// The same shape, consumed when reversing a snapshot into a working tree.
pub type GitRestoreState = GitState;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_none_and_empty_serialize_differently() {
        let detached = GitState {
            repo_url: None,
            head: "abc".to_string(),
            branch: None,
            patch: String::new(),
        };
        let empty = GitState {
            branch: Some(String::new()),
            ..detached.clone()
        };
        assert_ne!(
            serde_json::to_string(&detached).unwrap(),
            serde_json::to_string(&empty).unwrap()
        );
    }
}
