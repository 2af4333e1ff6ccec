//! Git subprocess helpers.
//!
//! All operations shell out to the `git` binary; a non-zero exit surfaces
//! as a `GitOperation` error carrying the subcommand and stderr.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{SentinelError, SentinelResult};
use crate::github::redact_url;

async fn run(workdir: &Path, operation: &str, args: &[&str]) -> SentinelResult<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| SentinelError::git(operation, format!("failed to spawn git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SentinelError::git(operation, stderr.trim().to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Shallow-clone a repository into `dest`.
///
/// The clone URL may carry credentials; they are redacted from any error.
///
/// # Errors
///
/// Returns a `GitOperation` error when the clone fails.
pub async fn clone_shallow(url: &str, dest: &Path, workdir: &Path) -> SentinelResult<()> {
    let dest_str = dest.to_string_lossy();
    let result = run(
        workdir,
        "clone",
        &["clone", "--depth", "1", url, dest_str.as_ref()],
    )
    .await;

    match result {
        Ok(_) => {
            debug!(url = %redact_url(url), dest = %dest_str, "Repository cloned");
            Ok(())
        }
        Err(SentinelError::GitOperation { operation, reason }) => {
            Err(SentinelError::GitOperation {
                operation,
                reason: reason.replace(url, &redact_url(url)),
            })
        }
        Err(e) => Err(e),
    }
}

/// Set the committer identity inside a clone.
///
/// # Errors
///
/// Returns a `GitOperation` error when git config fails.
pub async fn configure_user(workdir: &Path, name: &str, email: &str) -> SentinelResult<()> {
    run(workdir, "config", &["config", "user.name", name]).await?;
    run(workdir, "config", &["config", "user.email", email]).await?;
    Ok(())
}

/// Create and check out a branch from the current HEAD.
///
/// # Errors
///
/// Returns a `GitOperation` error when the branch cannot be created.
pub async fn create_branch(workdir: &Path, branch: &str) -> SentinelResult<()> {
    run(workdir, "checkout -b", &["checkout", "-b", branch]).await?;
    debug!(branch = %branch, "Branch created");
    Ok(())
}

/// Name of the currently checked-out branch.
///
/// # Errors
///
/// Returns a `GitOperation` error when HEAD cannot be resolved.
pub async fn current_branch(workdir: &Path) -> SentinelResult<String> {
    run(workdir, "rev-parse", &["rev-parse", "--abbrev-ref", "HEAD"]).await
}

/// Whether the working tree has any staged, unstaged, or untracked changes.
///
/// # Errors
///
/// Returns a `GitOperation` error when status fails.
pub async fn has_changes(workdir: &Path) -> SentinelResult<bool> {
    let status = run(workdir, "status", &["status", "--porcelain"]).await?;
    Ok(!status.is_empty())
}

/// Stage everything and commit. Returns `false` when there was nothing to
/// commit.
///
/// # Errors
///
/// Returns a `GitOperation` error when staging or committing fails.
pub async fn commit_all(workdir: &Path, message: &str) -> SentinelResult<bool> {
    run(workdir, "add", &["add", "-A"]).await?;

    if !has_changes(workdir).await? {
        return Ok(false);
    }

    run(workdir, "commit", &["commit", "-m", message]).await?;
    debug!(message = %message, "Changes committed");
    Ok(true)
}

/// Push a branch to `origin` with upstream tracking.
///
/// # Errors
///
/// Returns a `GitOperation` error when the push is rejected.
pub async fn push_branch(workdir: &Path, branch: &str) -> SentinelResult<()> {
    run(workdir, "push", &["push", "-u", "origin", branch]).await?;
    debug!(branch = %branch, "Branch pushed");
    Ok(())
}

/// Read a git config value from a clone, `None` when unset.
pub async fn config_value(workdir: &Path, key: &str) -> Option<String> {
    run(workdir, "config", &["config", "--get", key])
        .await
        .ok()
        .filter(|v| !v.is_empty())
}

/// Installed git version, for the health endpoint.
///
/// # Errors
///
/// Returns a `GitOperation` error when git is not installed.
pub async fn version() -> SentinelResult<String> {
    run(Path::new("."), "version", &["--version"]).await
}
