//! HTTP server: webhook ingestion, manual issue API, and health checks.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::agent::CodingAgent;
use crate::config::{AuthMode, Config};
use crate::error::SentinelError;
use crate::git;
use crate::github::GitHubClient;
use crate::models::{IssueAction, IssueEvent};
use crate::processor::{IssueProcessor, ProcessOutcome, WorkflowState};
use crate::webhooks::verify_webhook_signature;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,
    /// GitHub API client.
    pub github: Arc<GitHubClient>,
    /// Workflow orchestrator.
    pub processor: Arc<IssueProcessor>,
    /// Coding agent handle, used by health checks.
    pub agent: Arc<dyn CodingAgent>,
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Webhook endpoints
        .route("/webhook/github", post(github_webhook_handler))
        .route("/webhook/status", get(webhook_status))
        // Manual issue API
        .route("/github/issues", get(list_issues))
        .route("/github/issues/{number}", get(get_issue))
        .route("/github/issues/{number}/process", post(process_issue))
        .route("/github/issues/{number}/approve", post(approve_issue))
        .route("/github/issues/{number}/reject", post(reject_issue))
        .route("/github/labels", get(list_labels))
        .route("/github/status", get(service_status))
        // Health
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .route("/health/live", get(liveness_check))
        .route("/", get(root))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn spawn_processing(state: &AppState, repository: String, issue_number: u64) {
    let processor = state.processor.clone();
    tokio::spawn(async move {
        match processor.process_issue(&repository, issue_number).await {
            Ok(ProcessOutcome::PullRequestOpened { url }) => {
                info!(
                    repository = %repository,
                    issue = issue_number,
                    pr_url = %url,
                    "Implementation finished"
                );
            }
            Ok(outcome) => {
                info!(
                    repository = %repository,
                    issue = issue_number,
                    outcome = ?outcome,
                    "Processing finished"
                );
            }
            Err(SentinelError::StateConflict { .. }) => {
                info!(
                    repository = %repository,
                    issue = issue_number,
                    "Run already in flight, duplicate delivery ignored"
                );
            }
            Err(e) => {
                // Already reported as an issue comment by the processor
                error!(
                    repository = %repository,
                    issue = issue_number,
                    error = %e,
                    "Background processing failed"
                );
            }
        }
    });
}

/// Handle incoming GitHub webhooks.
///
/// This handler:
/// 1. Verifies the webhook signature (if a secret is configured)
/// 2. Filters to `issues` events with relevant label actions
/// 3. Dispatches processing in the background and returns 200 immediately
pub async fn github_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let delivery_id = headers
        .get("x-github-delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    info!(
        delivery_id = %delivery_id,
        event_type = %event_type,
        "Received GitHub webhook"
    );

    // Verify signature if secret is configured; nothing may be scheduled
    // from an unverifiable body
    if let Some(secret) = &state.config.webhook_secret {
        let Some(signature) = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
        else {
            warn!(delivery_id = %delivery_id, "Missing X-Hub-Signature-256 header");
            return Err(StatusCode::BAD_REQUEST);
        };

        if !verify_webhook_signature(&body, signature, secret) {
            warn!(delivery_id = %delivery_id, "Invalid webhook signature");
            return Err(StatusCode::BAD_REQUEST);
        }
        debug!("Webhook signature verified");
    }

    if event_type == "ping" {
        return Ok(Json(json!({ "status": "ok", "message": "pong" })));
    }

    if event_type != "issues" {
        debug!(event_type = %event_type, "Ignoring unsupported event type");
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "unsupported_event_type"
        })));
    }

    let event: IssueEvent = serde_json::from_slice(&body).map_err(|e| {
        warn!(delivery_id = %delivery_id, error = %e, "Failed to parse issues payload");
        StatusCode::BAD_REQUEST
    })?;

    if !matches!(event.action, IssueAction::Labeled | IssueAction::Unlabeled) {
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "unsupported_action"
        })));
    }

    let Some(label) = event.label_name() else {
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "missing_label"
        })));
    };

    if !state.config.labels.is_workflow_label(label) {
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "irrelevant_label"
        })));
    }

    if event.action == IssueAction::Unlabeled {
        if label == state.config.labels.proposal {
            info!(
                repository = %event.repository.full_name,
                issue = event.issue.number,
                "Proposal label removed by a human, treating as rejection"
            );
            return Ok(Json(json!({
                "status": "ignored",
                "reason": "proposal_withdrawn"
            })));
        }
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "label_removed"
        })));
    }

    // The proposal and working labels are our own writes
    if !state.config.labels.dispatches_processing(label) {
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "label_managed_by_service"
        })));
    }

    // Token mode is bound to a single repository
    if let Some(configured) = state.github.default_repository() {
        if configured != event.repository.full_name {
            warn!(
                repository = %event.repository.full_name,
                configured = %configured,
                "Webhook from unconfigured repository"
            );
            return Ok(Json(json!({
                "status": "ignored",
                "reason": "unknown_repository"
            })));
        }
    }

    let issue_number = event.issue.number;
    info!(
        repository = %event.repository.full_name,
        issue = issue_number,
        label = %label,
        "Dispatching background processing"
    );
    spawn_processing(&state, event.repository.full_name.clone(), issue_number);

    Ok(Json(json!({
        "status": "accepted",
        "issue_number": issue_number,
        "label": label,
        "processed": true
    })))
}

/// Report webhook configuration for operators.
async fn webhook_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "signature_verification": state.config.webhook_secret.is_some(),
        "labels": {
            "trigger": state.config.labels.trigger,
            "proposal": state.config.labels.proposal,
            "approved": state.config.labels.approved,
            "working": state.config.labels.working,
        }
    }))
}

#[derive(Debug, Deserialize)]
struct IssueListQuery {
    /// Repository `owner/name`; required in App mode.
    #[serde(default)]
    repository: Option<String>,
    /// Filter to a single label.
    #[serde(default)]
    label: Option<String>,
    /// Issue state filter (`open`, `closed`, `all`).
    #[serde(default)]
    state: Option<String>,
    /// Maximum results.
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct IssueQuery {
    #[serde(default)]
    repository: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessRequest {
    #[serde(default)]
    repository: Option<String>,
    /// Skip the trigger-label and working-label checks.
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RejectRequest {
    #[serde(default)]
    repository: Option<String>,
    /// Reviewer feedback; when present a revised proposal is generated.
    #[serde(default)]
    feedback: Option<String>,
}

fn handler_error(context: &str, e: &SentinelError) -> StatusCode {
    error!(error = %e, "{context}");
    e.status_code()
}

/// List workflow-relevant issues.
async fn list_issues(
    State(state): State<AppState>,
    Query(query): Query<IssueListQuery>,
) -> Result<Json<Value>, StatusCode> {
    let repository = state
        .github
        .resolve_repository(query.repository.as_deref())
        .map_err(|e| handler_error("Failed to resolve repository", &e))?;

    let issues = state
        .github
        .list_issues(
            &repository,
            query.label.as_deref(),
            query.state.as_deref().unwrap_or("open"),
            query.limit.unwrap_or(30),
        )
        .await
        .map_err(|e| handler_error("Failed to list issues", &e))?;

    Ok(Json(json!({
        "repository": repository,
        "count": issues.len(),
        "issues": issues,
    })))
}

/// Fetch a single issue with its derived workflow state.
async fn get_issue(
    State(state): State<AppState>,
    Path(number): Path<u64>,
    Query(query): Query<IssueQuery>,
) -> Result<Json<Value>, StatusCode> {
    let repository = state
        .github
        .resolve_repository(query.repository.as_deref())
        .map_err(|e| handler_error("Failed to resolve repository", &e))?;

    let issue = state
        .github
        .get_issue(&repository, number)
        .await
        .map_err(|e| handler_error("Failed to fetch issue", &e))?;

    let workflow_state =
        WorkflowState::from_labels(issue.label_names(), &state.config.labels);

    Ok(Json(json!({
        "repository": repository,
        "workflow_state": workflow_state.as_str(),
        "issue": issue,
    })))
}

/// Manually trigger processing for an issue.
async fn process_issue(
    State(state): State<AppState>,
    Path(number): Path<u64>,
    request: Option<Json<ProcessRequest>>,
) -> Result<Json<Value>, StatusCode> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let repository = state
        .github
        .resolve_repository(request.repository.as_deref())
        .map_err(|e| handler_error("Failed to resolve repository", &e))?;

    let issue = state
        .github
        .get_issue(&repository, number)
        .await
        .map_err(|e| handler_error("Failed to fetch issue", &e))?;

    let workflow_state =
        WorkflowState::from_labels(issue.label_names(), &state.config.labels);

    if !request.force {
        if workflow_state == WorkflowState::Working {
            warn!(repository = %repository, issue = number, "Issue already being processed");
            return Err(StatusCode::CONFLICT);
        }
        if !matches!(
            workflow_state,
            WorkflowState::AwaitingAnalysis | WorkflowState::Approved
        ) {
            warn!(
                repository = %repository,
                issue = number,
                state = workflow_state.as_str(),
                "Issue is not in a processable state"
            );
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    info!(
        repository = %repository,
        issue = number,
        force = request.force,
        "Manual processing trigger"
    );
    spawn_processing(&state, repository.clone(), number);

    Ok(Json(json!({
        "status": "accepted",
        "repository": repository,
        "issue_number": number,
        "state": workflow_state.as_str(),
    })))
}

/// Approve the pending proposal: swap the proposal label for the approval
/// label. Implementation starts when the resulting webhook arrives.
async fn approve_issue(
    State(state): State<AppState>,
    Path(number): Path<u64>,
    request: Option<Json<IssueQuery>>,
) -> Result<Json<Value>, StatusCode> {
    let repository = state
        .github
        .resolve_repository(request.as_ref().and_then(|r| r.repository.as_deref()))
        .map_err(|e| handler_error("Failed to resolve repository", &e))?;

    let issue = state
        .github
        .get_issue(&repository, number)
        .await
        .map_err(|e| handler_error("Failed to fetch issue", &e))?;

    if !issue.has_label(&state.config.labels.proposal) {
        warn!(repository = %repository, issue = number, "No pending proposal to approve");
        return Err(StatusCode::CONFLICT);
    }

    state
        .github
        .add_label(&repository, number, &state.config.labels.approved)
        .await
        .map_err(|e| handler_error("Failed to add approval label", &e))?;
    state
        .github
        .remove_label(&repository, number, &state.config.labels.proposal)
        .await
        .map_err(|e| handler_error("Failed to remove proposal label", &e))?;

    info!(repository = %repository, issue = number, "Proposal approved");
    Ok(Json(json!({
        "status": "approved",
        "repository": repository,
        "issue_number": number,
    })))
}

/// Reject the pending proposal; with feedback, a revised proposal is
/// generated in the background.
async fn reject_issue(
    State(state): State<AppState>,
    Path(number): Path<u64>,
    request: Option<Json<RejectRequest>>,
) -> Result<Json<Value>, StatusCode> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let repository = state
        .github
        .resolve_repository(request.repository.as_deref())
        .map_err(|e| handler_error("Failed to resolve repository", &e))?;

    let issue = state
        .github
        .get_issue(&repository, number)
        .await
        .map_err(|e| handler_error("Failed to fetch issue", &e))?;

    if !issue.has_label(&state.config.labels.proposal) {
        warn!(repository = %repository, issue = number, "No pending proposal to reject");
        return Err(StatusCode::CONFLICT);
    }

    state
        .github
        .remove_label(&repository, number, &state.config.labels.proposal)
        .await
        .map_err(|e| handler_error("Failed to remove proposal label", &e))?;

    let refining = if let Some(feedback) = request
        .feedback
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
    {
        let comment = format!("❌ **Proposal rejected**\n\nFeedback: {feedback}");
        if let Err(e) = state
            .github
            .create_comment(&repository, number, &comment)
            .await
        {
            warn!(error = %e, "Failed to post rejection comment");
        }

        let processor = state.processor.clone();
        let repo = repository.clone();
        let feedback = feedback.to_string();
        tokio::spawn(async move {
            if let Err(e) = processor.refine_proposal(&repo, number, &feedback).await {
                error!(
                    repository = %repo,
                    issue = number,
                    error = %e,
                    "Proposal refinement failed"
                );
            }
        });
        true
    } else {
        false
    };

    info!(repository = %repository, issue = number, refining = refining, "Proposal rejected");
    Ok(Json(json!({
        "status": "rejected",
        "repository": repository,
        "issue_number": number,
        "refining": refining,
    })))
}

/// List the labels defined on the repository.
async fn list_labels(
    State(state): State<AppState>,
    Query(query): Query<IssueQuery>,
) -> Result<Json<Value>, StatusCode> {
    let repository = state
        .github
        .resolve_repository(query.repository.as_deref())
        .map_err(|e| handler_error("Failed to resolve repository", &e))?;

    let labels = state
        .github
        .list_labels(&repository)
        .await
        .map_err(|e| handler_error("Failed to list labels", &e))?;

    Ok(Json(json!({
        "repository": repository,
        "count": labels.len(),
        "labels": labels,
    })))
}

/// Service configuration summary.
async fn service_status(State(state): State<AppState>) -> Json<Value> {
    let mode = match state.github.auth_mode() {
        AuthMode::App => "app",
        AuthMode::Token => "token",
    };
    Json(json!({
        "service": "sentinel",
        "version": env!("CARGO_PKG_VERSION"),
        "auth_mode": mode,
        "repository": state.github.default_repository(),
        "labels": {
            "trigger": state.config.labels.trigger,
            "proposal": state.config.labels.proposal,
            "approved": state.config.labels.approved,
            "working": state.config.labels.working,
        },
        "branch_prefix": state.config.git.branch_prefix,
        "base_branch": state.config.git.base_branch,
    }))
}

/// Aggregate health check: GitHub auth, agent CLI, git, workspace dir.
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let github = match state.github.check_auth().await {
        Ok(detail) => json!({ "status": "ok", "detail": detail }),
        Err(e) => json!({ "status": "error", "error": e.to_string() }),
    };

    let agent = match state.agent.availability().await {
        Ok(version) => json!({ "status": "ok", "version": version }),
        Err(e) => json!({ "status": "error", "error": e.to_string() }),
    };

    let git = match git::version().await {
        Ok(version) => json!({ "status": "ok", "version": version }),
        Err(e) => json!({ "status": "error", "error": e.to_string() }),
    };

    let workspace = match std::fs::create_dir_all(&state.config.workspace_base_dir) {
        Ok(()) => json!({
            "status": "ok",
            "base_dir": state.config.workspace_base_dir.display().to_string()
        }),
        Err(e) => json!({ "status": "error", "error": e.to_string() }),
    };

    let checks = json!({
        "github": github,
        "agent": agent,
        "git": git,
        "workspace": workspace,
    });
    let healthy = checks
        .as_object()
        .is_some_and(|m| m.values().all(|c| c["status"] == "ok"));

    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "checks": checks,
    }))
}

/// Readiness probe.
async fn readiness_check() -> Json<Value> {
    Json(json!({ "status": "ready" }))
}

/// Liveness probe.
async fn liveness_check() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

/// Service banner.
async fn root() -> Json<Value> {
    Json(json!({
        "service": "sentinel",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}
