//! Ephemeral clone workspaces.
//!
//! Every processing run gets a unique directory under the base dir; the
//! `Workspace` guard removes it on drop so failure paths cannot leak clones.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GitConfig;
use crate::error::SentinelResult;
use crate::git;

/// Creates and populates per-run workspace directories.
pub struct WorkspaceManager {
    base_dir: PathBuf,
    git: GitConfig,
}

/// RAII guard over one workspace directory.
pub struct Workspace {
    path: PathBuf,
}

impl WorkspaceManager {
    #[must_use]
    pub fn new(base_dir: PathBuf, git: GitConfig) -> Self {
        Self { base_dir, git }
    }

    /// Base directory the workspaces live under.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Remove leftover workspace directories from previous runs.
    ///
    /// Called at startup; the service owns the base dir, so anything in it
    /// is an orphan from an unclean shutdown.
    pub fn sweep(&self) {
        let Ok(entries) = std::fs::read_dir(&self.base_dir) else {
            return;
        };
        let mut removed = 0usize;
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                match std::fs::remove_dir_all(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to remove orphaned workspace");
                    }
                }
            }
        }
        if removed > 0 {
            info!(count = removed, "Removed orphaned workspaces");
        }
    }

    /// Create a unique workspace and shallow-clone the repository into it.
    ///
    /// The directory is removed again if the clone fails.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or the clone
    /// fails.
    pub async fn acquire(
        &self,
        repository: &str,
        issue_number: u64,
        clone_url: &str,
    ) -> SentinelResult<Workspace> {
        std::fs::create_dir_all(&self.base_dir)?;

        let slug = repository.replace('/', "_");
        let nonce = Uuid::new_v4().simple().to_string();
        let name = format!("{slug}-issue-{issue_number}-{}", &nonce[..8]);
        let path = self.base_dir.join(name);

        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        let workspace = Workspace { path };

        git::clone_shallow(clone_url, Path::new("."), workspace.path()).await?;
        git::configure_user(workspace.path(), &self.git.user_name, &self.git.user_email).await?;

        debug!(
            repository = %repository,
            issue = issue_number,
            path = %workspace.path().display(),
            "Workspace ready"
        );

        // The guard removes the directory on any exit path from here on
        Ok(workspace)
    }
}

impl Workspace {
    /// Location of the clone.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove workspace");
            }
        }
    }
}
