//! Issue processing workflow.
//!
//! Workflow state is never stored; it is derived from the issue's current
//! labels on every run. The working label doubles as a mutual-exclusion
//! marker so duplicate webhook deliveries exit early.

use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::CodingAgent;
use crate::config::{GitConfig, LabelConfig};
use crate::error::{SentinelError, SentinelResult};
use crate::git;
use crate::github::GitHubClient;
use crate::models::{Comment, Issue, PullRequest};
use crate::workspace::WorkspaceManager;

/// First line of every proposal comment; the implementation flow finds the
/// approved proposal by scanning comments for it.
pub const PROPOSAL_MARKER: &str = "🤖 **Sentinel System - Issue Analysis & Proposal**";

/// Workflow position of an issue, derived from its label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    /// No workflow labels present.
    Idle,
    /// Trigger label present, no proposal yet.
    AwaitingAnalysis,
    /// Proposal posted, awaiting human review.
    ProposalPending,
    /// Human approved, implementation may start.
    Approved,
    /// A run is currently in flight.
    Working,
}

impl WorkflowState {
    /// Derive the state from a label set.
    ///
    /// Precedence is working > approved > proposal-pending > trigger: a
    /// stale trigger label never outranks an approval, and an in-flight run
    /// outranks everything.
    pub fn from_labels<'a, I>(labels: I, config: &LabelConfig) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = Self::Idle;
        for label in labels {
            let candidate = if label == config.working {
                Self::Working
            } else if label == config.approved {
                Self::Approved
            } else if label == config.proposal {
                Self::ProposalPending
            } else if label == config.trigger {
                Self::AwaitingAnalysis
            } else {
                continue;
            };
            if candidate as u8 > state as u8 {
                state = candidate;
            }
        }
        state
    }

    /// Stable name for API responses.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingAnalysis => "awaiting_analysis",
            Self::ProposalPending => "proposal_pending",
            Self::Approved => "approved",
            Self::Working => "working",
        }
    }
}

/// What a processing run accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Analysis ran and a proposal comment was posted.
    ProposalPosted,
    /// Implementation ran and a PR was opened.
    PullRequestOpened { url: String },
    /// Implementation ran but the agent produced no changes.
    NoChangesRequired,
    /// The issue was not in a processable state.
    Skipped { state: WorkflowState },
}

/// Extract the most recent proposal from issue comments.
#[must_use]
pub fn extract_proposal(comments: &[Comment]) -> Option<String> {
    comments
        .iter()
        .rev()
        .find(|c| c.body.starts_with(PROPOSAL_MARKER))
        .map(|c| {
            c.body
                .strip_prefix(PROPOSAL_MARKER)
                .unwrap_or(&c.body)
                .trim()
                .to_string()
        })
}

/// Orchestrates analysis and implementation runs for one issue at a time.
pub struct IssueProcessor {
    github: Arc<GitHubClient>,
    agent: Arc<dyn CodingAgent>,
    workspaces: Arc<WorkspaceManager>,
    labels: LabelConfig,
    git: GitConfig,
}

impl IssueProcessor {
    #[must_use]
    pub fn new(
        github: Arc<GitHubClient>,
        agent: Arc<dyn CodingAgent>,
        workspaces: Arc<WorkspaceManager>,
        labels: LabelConfig,
        git: GitConfig,
    ) -> Self {
        Self {
            github,
            agent,
            workspaces,
            labels,
            git,
        }
    }

    /// Process an issue according to its current label state.
    ///
    /// The working label is applied as the first mutation and removed on
    /// every exit path. Failures are reported back as an issue comment;
    /// the caller only gets the error for logging.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` when a run is already in flight, or the
    /// underlying failure of the analysis/implementation flow.
    pub async fn process_issue(
        &self,
        repository: &str,
        issue_number: u64,
    ) -> SentinelResult<ProcessOutcome> {
        let issue = self.github.get_issue(repository, issue_number).await?;
        let state = WorkflowState::from_labels(issue.label_names(), &self.labels);

        info!(
            repository = %repository,
            issue = issue_number,
            state = state.as_str(),
            "Processing issue"
        );

        if state == WorkflowState::Working {
            return Err(SentinelError::StateConflict { issue_number });
        }

        self.github
            .add_label(repository, issue_number, &self.labels.working)
            .await?;

        let result = match state {
            WorkflowState::Approved => self.run_implementation(repository, &issue).await,
            WorkflowState::AwaitingAnalysis => self
                .run_analysis(repository, &issue)
                .await
                .map(|()| ProcessOutcome::ProposalPosted),
            other => Ok(ProcessOutcome::Skipped { state: other }),
        };

        if let Err(e) = self
            .github
            .remove_label(repository, issue_number, &self.labels.working)
            .await
        {
            warn!(
                repository = %repository,
                issue = issue_number,
                error = %e,
                "Failed to remove working label"
            );
        }

        match result {
            Ok(outcome) => {
                info!(
                    repository = %repository,
                    issue = issue_number,
                    outcome = ?outcome,
                    "Issue processed"
                );
                Ok(outcome)
            }
            Err(e) => {
                let phase = if state == WorkflowState::Approved {
                    "implementation"
                } else {
                    "analysis"
                };
                self.report_failure(repository, issue_number, phase, &e).await;
                if state == WorkflowState::AwaitingAnalysis {
                    // Drop the trigger so a failing issue does not loop
                    if let Err(remove_err) = self
                        .github
                        .remove_label(repository, issue_number, &self.labels.trigger)
                        .await
                    {
                        warn!(
                            repository = %repository,
                            issue = issue_number,
                            error = %remove_err,
                            "Failed to remove trigger label after analysis failure"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Analysis flow: clone for context, run the agent read-only, post the
    /// proposal, and swap the trigger label for the proposal label.
    async fn run_analysis(&self, repository: &str, issue: &Issue) -> SentinelResult<()> {
        let clone_url = self.github.clone_url(repository).await?;
        let workspace = self
            .workspaces
            .acquire(repository, issue.number, &clone_url)
            .await?;

        let proposal = self.agent.analyze(issue, workspace.path()).await?;

        let comment = self.proposal_comment(&proposal);
        self.github
            .create_comment(repository, issue.number, &comment)
            .await?;
        self.github
            .add_label(repository, issue.number, &self.labels.proposal)
            .await?;
        self.github
            .remove_label(repository, issue.number, &self.labels.trigger)
            .await?;

        info!(
            repository = %repository,
            issue = issue.number,
            "Proposal posted for review"
        );
        Ok(())
    }

    /// Implementation flow: clone, branch, let the agent edit, commit,
    /// push, and open a PR referencing the issue.
    async fn run_implementation(
        &self,
        repository: &str,
        issue: &Issue,
    ) -> SentinelResult<ProcessOutcome> {
        let clone_url = self.github.clone_url(repository).await?;
        let workspace = self
            .workspaces
            .acquire(repository, issue.number, &clone_url)
            .await?;

        let proposal = self.latest_proposal(repository, issue).await;
        let branch = format!("{}{}", self.git.branch_prefix, issue.number);
        git::create_branch(workspace.path(), &branch).await?;

        let summary = self
            .agent
            .implement(issue, &proposal, workspace.path())
            .await?;

        let title_snippet: String = issue.title.chars().take(50).collect();
        let commit_message = format!(
            "Implement solution for issue #{}: {title_snippet}",
            issue.number
        );
        if !git::commit_all(workspace.path(), &commit_message).await? {
            info!(
                repository = %repository,
                issue = issue.number,
                "Agent made no changes"
            );
            self.github
                .create_comment(
                    repository,
                    issue.number,
                    "🤖 The approved proposal required no code changes; nothing was committed.",
                )
                .await?;
            self.github
                .remove_label(repository, issue.number, &self.labels.approved)
                .await?;
            return Ok(ProcessOutcome::NoChangesRequired);
        }

        git::push_branch(workspace.path(), &branch).await?;

        let pr_title = format!("Fix issue #{}: {}", issue.number, issue.title);
        let pr_body = pull_request_body(issue, &summary);
        let pr = self
            .github
            .create_pull_request(
                repository,
                &pr_title,
                &pr_body,
                &branch,
                &self.git.base_branch,
            )
            .await?;

        self.github
            .create_comment(repository, issue.number, &completion_comment(&pr))
            .await?;
        self.github
            .remove_label(repository, issue.number, &self.labels.approved)
            .await?;

        Ok(ProcessOutcome::PullRequestOpened { url: pr.html_url })
    }

    /// Re-run analysis with reviewer feedback and post a revised proposal.
    ///
    /// # Errors
    ///
    /// Returns the underlying failure; no labels are mutated on error.
    pub async fn refine_proposal(
        &self,
        repository: &str,
        issue_number: u64,
        feedback: &str,
    ) -> SentinelResult<()> {
        let issue = self.github.get_issue(repository, issue_number).await?;
        let previous = self.latest_proposal(repository, &issue).await;

        let clone_url = self.github.clone_url(repository).await?;
        let workspace = self
            .workspaces
            .acquire(repository, issue.number, &clone_url)
            .await?;

        let revised = self
            .agent
            .refine(&issue, &previous, feedback, workspace.path())
            .await?;

        let comment = self.proposal_comment(&revised);
        self.github
            .create_comment(repository, issue_number, &comment)
            .await?;
        self.github
            .add_label(repository, issue_number, &self.labels.proposal)
            .await?;

        info!(
            repository = %repository,
            issue = issue_number,
            "Revised proposal posted"
        );
        Ok(())
    }

    /// The most recent proposal for an issue; falls back to the issue body
    /// when no proposal comment exists.
    async fn latest_proposal(&self, repository: &str, issue: &Issue) -> String {
        match self.github.list_comments(repository, issue.number).await {
            Ok(comments) => extract_proposal(&comments).unwrap_or_else(|| {
                issue
                    .body
                    .clone()
                    .unwrap_or_else(|| issue.title.clone())
            }),
            Err(e) => {
                warn!(
                    repository = %repository,
                    issue = issue.number,
                    error = %e,
                    "Failed to list comments, falling back to issue body"
                );
                issue.body.clone().unwrap_or_else(|| issue.title.clone())
            }
        }
    }

    fn proposal_comment(&self, proposal: &str) -> String {
        format!(
            "{PROPOSAL_MARKER}\n\n{proposal}\n\n---\n\
             ✅ To approve this proposal and start implementation, add the \
             `{approved}` label.\n\
             ❌ To reject it, remove the `{proposal_label}` label.",
            approved = self.labels.approved,
            proposal_label = self.labels.proposal,
        )
    }

    /// Post a diagnostic comment; failures here are only logged.
    async fn report_failure(
        &self,
        repository: &str,
        issue_number: u64,
        phase: &str,
        error: &SentinelError,
    ) {
        let body = format!(
            "⚠️ **Sentinel System - Processing Failed**\n\n\
             The {phase} run for this issue failed:\n\n```\n{error}\n```\n\n\
             Re-add the `{trigger}` label to retry.",
            trigger = self.labels.trigger,
        );
        if let Err(e) = self
            .github
            .create_comment(repository, issue_number, &body)
            .await
        {
            warn!(
                repository = %repository,
                issue = issue_number,
                error = %e,
                "Failed to post failure comment"
            );
        }
    }
}

fn pull_request_body(issue: &Issue, summary: &str) -> String {
    format!(
        "Resolves #{number}\n\n## Implementation Summary\n\n{summary}\n\n---\n\
         *This pull request was generated automatically from the approved \
         proposal on issue #{number}.*",
        number = issue.number,
    )
}

fn completion_comment(pr: &PullRequest) -> String {
    format!(
        "🤖 **Sentinel System - Implementation Complete**\n\n\
         Pull request opened: {}\n\nPlease review and merge.",
        pr.html_url
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelConfig {
        LabelConfig {
            trigger: "sentinel-analyze".to_string(),
            proposal: "proposal-pending".to_string(),
            approved: "approved".to_string(),
            working: "implementing".to_string(),
        }
    }

    fn state_of(names: &[&str]) -> WorkflowState {
        WorkflowState::from_labels(names.iter().copied(), &labels())
    }

    #[test]
    fn test_state_derivation_basic() {
        assert_eq!(state_of(&[]), WorkflowState::Idle);
        assert_eq!(state_of(&["bug", "help wanted"]), WorkflowState::Idle);
        assert_eq!(
            state_of(&["sentinel-analyze"]),
            WorkflowState::AwaitingAnalysis
        );
        assert_eq!(
            state_of(&["proposal-pending"]),
            WorkflowState::ProposalPending
        );
        assert_eq!(state_of(&["approved"]), WorkflowState::Approved);
        assert_eq!(state_of(&["implementing"]), WorkflowState::Working);
    }

    #[test]
    fn test_state_derivation_precedence() {
        // A stale trigger never outranks later stages
        assert_eq!(
            state_of(&["sentinel-analyze", "proposal-pending"]),
            WorkflowState::ProposalPending
        );
        assert_eq!(
            state_of(&["proposal-pending", "approved"]),
            WorkflowState::Approved
        );
        // An in-flight run outranks everything
        assert_eq!(
            state_of(&["approved", "implementing", "sentinel-analyze"]),
            WorkflowState::Working
        );
        // Order of the label set is irrelevant
        assert_eq!(
            state_of(&["approved", "sentinel-analyze"]),
            state_of(&["sentinel-analyze", "approved"])
        );
    }

    #[test]
    fn test_extract_proposal_takes_latest() {
        let comment = |body: &str| Comment {
            id: 1,
            body: body.to_string(),
            created_at: None,
            user: None,
        };

        let comments = vec![
            comment("just a human comment"),
            comment(&format!("{PROPOSAL_MARKER}\n\nfirst proposal")),
            comment("another human comment"),
            comment(&format!("{PROPOSAL_MARKER}\n\nrevised proposal")),
        ];

        let proposal = extract_proposal(&comments).unwrap();
        assert!(proposal.starts_with("revised proposal"));
    }

    #[test]
    fn test_extract_proposal_none_without_marker() {
        let comments = vec![Comment {
            id: 1,
            body: "nothing to see".to_string(),
            created_at: None,
            user: None,
        }];
        assert!(extract_proposal(&comments).is_none());
    }

    #[test]
    fn test_pull_request_body_references_issue() {
        let issue = Issue {
            number: 42,
            title: "Crash on empty input".to_string(),
            body: None,
            labels: vec![],
            state: None,
            html_url: None,
            user: None,
        };
        let body = pull_request_body(&issue, "Added a guard clause.");
        assert!(body.starts_with("Resolves #42"));
        assert!(body.contains("Added a guard clause."));
    }
}
