//! Configuration for the sentinel service.

use std::env;
use std::path::PathBuf;

use crate::error::{SentinelError, SentinelResult};

pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
pub const DEFAULT_CLONE_BASE: &str = "https://github.com";

/// Service configuration, resolved once at startup from the environment.
#[derive(Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Webhook signing secret; signatures are enforced only when set.
    pub webhook_secret: Option<String>,
    /// GitHub authentication settings.
    pub github: GitHubConfig,
    /// Workflow label vocabulary.
    pub labels: LabelConfig,
    /// Git branch/commit settings.
    pub git: GitConfig,
    /// Base directory for ephemeral clone workspaces.
    pub workspace_base_dir: PathBuf,
    /// AI coding CLI settings.
    pub agent: AgentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: env::var("SENTINEL_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
            webhook_secret: env::var("GITHUB_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            github: GitHubConfig::default(),
            labels: LabelConfig::default(),
            git: GitConfig::default(),
            workspace_base_dir: env::var("SENTINEL_WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/sentinel-workspaces")),
            agent: AgentConfig::default(),
        }
    }
}

impl Config {
    /// Validate the configuration for startup.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no usable GitHub auth mode can be
    /// resolved.
    pub fn validate(&self) -> SentinelResult<()> {
        self.github.auth_mode().map(|_| ())
    }
}

/// How the service authenticates against GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// GitHub App installation tokens (multi-repository).
    App,
    /// Personal access token bound to a single repository.
    Token,
}

/// GitHub API authentication settings.
#[derive(Clone)]
pub struct GitHubConfig {
    /// Personal access token (legacy single-repo mode).
    pub token: Option<String>,
    /// Repository `owner/name` for token mode.
    pub repository: Option<String>,
    /// GitHub App ID.
    pub app_id: Option<u64>,
    /// Path to the App's RSA private key (PEM).
    pub private_key_path: Option<PathBuf>,
    /// Installation IDs the App is allowed to act on.
    pub installation_ids: Vec<u64>,
    /// API base URL, overridable for tests.
    pub api_base: String,
    /// Clone host base URL, overridable for tests.
    pub clone_base: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        let mut installation_ids: Vec<u64> = env::var("GITHUB_APP_INSTALLATION_IDS")
            .ok()
            .map(|s| {
                s.split(',')
                    .filter_map(|id| id.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();
        if installation_ids.is_empty() {
            if let Some(id) = env::var("GITHUB_APP_INSTALLATION_ID")
                .ok()
                .and_then(|s| s.trim().parse().ok())
            {
                installation_ids.push(id);
            }
        }

        Self {
            token: env::var("GITHUB_TOKEN").ok().filter(|s| !s.is_empty()),
            repository: env::var("GITHUB_REPO").ok().filter(|s| !s.is_empty()),
            app_id: env::var("GITHUB_APP_ID").ok().and_then(|s| s.parse().ok()),
            private_key_path: env::var("GITHUB_APP_PRIVATE_KEY_PATH")
                .ok()
                .map(PathBuf::from),
            installation_ids,
            api_base: env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_GITHUB_API.to_string()),
            clone_base: env::var("SENTINEL_CLONE_BASE")
                .unwrap_or_else(|_| DEFAULT_CLONE_BASE.to_string()),
        }
    }
}

impl GitHubConfig {
    /// Resolve the auth mode. App credentials take precedence over a PAT.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when neither mode is fully configured.
    pub fn auth_mode(&self) -> SentinelResult<AuthMode> {
        if let (Some(_), Some(_)) = (self.app_id, self.private_key_path.as_ref()) {
            if self.installation_ids.is_empty() {
                return Err(SentinelError::Config {
                    reason: "GITHUB_APP_INSTALLATION_IDS is required in App mode".to_string(),
                });
            }
            return Ok(AuthMode::App);
        }
        if self.token.is_some() && self.repository.is_some() {
            return Ok(AuthMode::Token);
        }
        Err(SentinelError::Config {
            reason: "set GITHUB_APP_ID + GITHUB_APP_PRIVATE_KEY_PATH + GITHUB_APP_INSTALLATION_IDS, \
                     or GITHUB_TOKEN + GITHUB_REPO"
                .to_string(),
        })
    }
}

/// Workflow label vocabulary.
///
/// The workflow state lives entirely in these labels; the names are a
/// deployment choice and nothing outside this struct assumes specific ones.
#[derive(Debug, Clone)]
pub struct LabelConfig {
    /// Requests analysis of an issue.
    pub trigger: String,
    /// Marks an issue whose proposal awaits human review.
    pub proposal: String,
    /// Human approval to implement the proposal.
    pub approved: String,
    /// Mutual-exclusion marker while a run is in flight.
    pub working: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            trigger: env::var("SENTINEL_TRIGGER_LABEL")
                .unwrap_or_else(|_| "sentinel-analyze".to_string()),
            proposal: env::var("SENTINEL_PROPOSAL_LABEL")
                .unwrap_or_else(|_| "proposal-pending".to_string()),
            approved: env::var("SENTINEL_APPROVED_LABEL").unwrap_or_else(|_| "approved".to_string()),
            working: env::var("SENTINEL_WORKING_LABEL")
                .unwrap_or_else(|_| "implementing".to_string()),
        }
    }
}

impl LabelConfig {
    /// Labels that belong to the workflow vocabulary.
    #[must_use]
    pub fn is_workflow_label(&self, name: &str) -> bool {
        name == self.trigger || name == self.proposal || name == self.approved || name == self.working
    }

    /// Labels whose addition should start background processing.
    ///
    /// The proposal and working labels are written by the service itself;
    /// dispatching on them would re-enter processing from our own mutations.
    #[must_use]
    pub fn dispatches_processing(&self, name: &str) -> bool {
        name == self.trigger || name == self.approved
    }
}

/// Git branch, commit, and identity settings.
#[derive(Debug, Clone)]
pub struct GitConfig {
    /// Prefix for generated branch names; the issue number is appended.
    pub branch_prefix: String,
    /// Base branch that PRs target and branches fork from.
    pub base_branch: String,
    /// Committer name for generated commits.
    pub user_name: String,
    /// Committer email for generated commits.
    pub user_email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            branch_prefix: env::var("SENTINEL_BRANCH_PREFIX")
                .unwrap_or_else(|_| "sentinel/issue-".to_string()),
            base_branch: env::var("SENTINEL_BASE_BRANCH").unwrap_or_else(|_| "main".to_string()),
            user_name: env::var("SENTINEL_GIT_USER_NAME")
                .unwrap_or_else(|_| "Sentinel System".to_string()),
            user_email: env::var("SENTINEL_GIT_USER_EMAIL")
                .unwrap_or_else(|_| "sentinel@github-app.local".to_string()),
        }
    }
}

/// AI coding CLI settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// CLI command to invoke.
    pub command: String,
    /// Model identifier passed to the CLI.
    pub model: String,
    /// API key exported to the CLI process, when set.
    pub api_key: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: env::var("SENTINEL_AGENT_CLI").unwrap_or_else(|_| "aider".to_string()),
            model: env::var("SENTINEL_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            api_key: env::var("ANTHROPIC_API_KEY").ok().filter(|s| !s.is_empty()),
        }
    }
}
