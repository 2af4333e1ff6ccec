//! GitHub REST entities and webhook payload types.

use serde::{Deserialize, Serialize};

/// Issue label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    /// Label name.
    pub name: String,
    /// Label color (hex, no leading `#`).
    #[serde(default)]
    pub color: Option<String>,
    /// Label description.
    #[serde(default)]
    pub description: Option<String>,
}

/// GitHub user reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Account login.
    pub login: String,
}

/// GitHub issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Issue number within the repository.
    pub number: u64,
    /// Issue title.
    pub title: String,
    /// Issue body (markdown).
    #[serde(default)]
    pub body: Option<String>,
    /// Current labels.
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Issue state (`open`/`closed`).
    #[serde(default)]
    pub state: Option<String>,
    /// Web URL of the issue.
    #[serde(default)]
    pub html_url: Option<String>,
    /// Author.
    #[serde(default)]
    pub user: Option<User>,
}

impl Issue {
    /// Current label names.
    #[must_use]
    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }

    /// Whether the issue currently carries the given label.
    #[must_use]
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }
}

/// Issue comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    /// Comment ID.
    pub id: u64,
    /// Comment body (markdown).
    pub body: String,
    /// Creation timestamp (RFC 3339).
    #[serde(default)]
    pub created_at: Option<String>,
    /// Author.
    #[serde(default)]
    pub user: Option<User>,
}

/// Pull request returned by the create-PR endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// PR number.
    pub number: u64,
    /// Web URL of the PR.
    pub html_url: String,
    /// PR title.
    #[serde(default)]
    pub title: Option<String>,
}

/// Repository reference carried in webhook payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// Repository in `owner/name` form.
    pub full_name: String,
    /// HTTPS clone URL.
    #[serde(default)]
    pub clone_url: Option<String>,
    /// Default branch name.
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// Action field of an `issues` webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueAction {
    Labeled,
    Unlabeled,
    Opened,
    Edited,
    Closed,
    Reopened,
    /// Unknown action (catch-all to avoid parse failures)
    #[serde(other)]
    Unknown,
}

/// Payload of an `issues` webhook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueEvent {
    /// Action that triggered the event.
    pub action: IssueAction,
    /// Issue snapshot at event time.
    pub issue: Issue,
    /// Repository the issue belongs to.
    pub repository: Repository,
    /// Label that was added or removed, for labeled/unlabeled actions.
    #[serde(default)]
    pub label: Option<Label>,
}

impl IssueEvent {
    /// Name of the label that was added or removed, if any.
    #[must_use]
    pub fn label_name(&self) -> Option<&str> {
        self.label.as_ref().map(|l| l.name.as_str())
    }
}
