//! Shared fixtures for integration tests.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;

use sentinel::config::{AgentConfig, Config, GitConfig, GitHubConfig, LabelConfig};
use sentinel::error::{SentinelError, SentinelResult};
use sentinel::models::Issue;
use sentinel::{build_router, AppState, CodingAgent, GitHubClient, IssueProcessor, WorkspaceManager};

pub const REPO: &str = "octo/widgets";
pub const TOKEN: &str = "ghp_testtoken";

/// Test double for the coding agent.
///
/// `analyze` returns a fixed proposal; `implement` writes a file into the
/// workspace so git sees a change. Either can be switched to fail.
pub struct StubAgent {
    pub proposal: String,
    pub summary: String,
    pub fail_analyze: AtomicBool,
    pub fail_implement: AtomicBool,
    pub write_changes: AtomicBool,
    pub last_proposal: std::sync::Mutex<Option<String>>,
}

impl Default for StubAgent {
    fn default() -> Self {
        Self {
            proposal: "## 🔍 Problem Analysis\nParser panics.\n\n\
                       ## 💡 Proposed Solution\nGuard empty input.\n\n\
                       ## 📋 Implementation Plan\n1. Add guard.\n\n\
                       ## 📁 Files to Modify\nsrc/parser.rs"
                .to_string(),
            summary: "Added a guard clause to the parser.".to_string(),
            fail_analyze: AtomicBool::new(false),
            fail_implement: AtomicBool::new(false),
            write_changes: AtomicBool::new(true),
            last_proposal: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl CodingAgent for StubAgent {
    async fn analyze(&self, _issue: &Issue, _workspace: &Path) -> SentinelResult<String> {
        if self.fail_analyze.load(Ordering::SeqCst) {
            return Err(SentinelError::AiService {
                reason: "'aider' exited with exit status: 1: boom".to_string(),
            });
        }
        Ok(self.proposal.clone())
    }

    async fn implement(
        &self,
        issue: &Issue,
        proposal: &str,
        workspace: &Path,
    ) -> SentinelResult<String> {
        *self.last_proposal.lock().unwrap() = Some(proposal.to_string());
        if self.fail_implement.load(Ordering::SeqCst) {
            return Err(SentinelError::AiService {
                reason: "'aider' exited with exit status: 1: boom".to_string(),
            });
        }
        if self.write_changes.load(Ordering::SeqCst) {
            std::fs::write(
                workspace.join("fix.txt"),
                format!("fix for issue #{}\n", issue.number),
            )?;
        }
        Ok(self.summary.clone())
    }

    async fn refine(
        &self,
        _issue: &Issue,
        _previous: &str,
        feedback: &str,
        _workspace: &Path,
    ) -> SentinelResult<String> {
        Ok(format!("{}\n\nRevised per feedback: {feedback}", self.proposal))
    }

    async fn availability(&self) -> SentinelResult<String> {
        Ok("stub-agent 1.0".to_string())
    }
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git not installed");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Create a bare repository at `<base>/octo/widgets.git` with one commit on
/// `main`, matching the layout `clone_url` produces for a `file://` base.
pub fn make_bare_repo(base: &Path) -> PathBuf {
    let seed = base.join("seed");
    std::fs::create_dir_all(&seed).unwrap();
    run_git(&seed, &["init", "-b", "main"]);
    run_git(&seed, &["config", "user.name", "Seed"]);
    run_git(&seed, &["config", "user.email", "seed@example.com"]);
    std::fs::write(seed.join("README.md"), "# widgets\n").unwrap();
    run_git(&seed, &["add", "-A"]);
    run_git(&seed, &["commit", "-m", "initial"]);

    let bare = base.join("octo").join("widgets.git");
    std::fs::create_dir_all(bare.parent().unwrap()).unwrap();
    let bare_str = bare.to_string_lossy().to_string();
    run_git(base, &["clone", "--bare", &seed.to_string_lossy(), &bare_str]);
    bare
}

/// Branch names present in a bare repository.
pub fn bare_branches(bare: &Path) -> Vec<String> {
    let output = Command::new("git")
        .args(["--git-dir", &bare.to_string_lossy(), "branch", "--list"])
        .output()
        .expect("git not installed");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| l.trim_start_matches('*').trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Wire up an `AppState` against a mock GitHub API and a local clone base.
pub fn build_state(
    api_base: &str,
    clone_base: &str,
    workspace_base: &Path,
    webhook_secret: Option<&str>,
    agent: Arc<dyn CodingAgent>,
) -> AppState {
    let labels = LabelConfig {
        trigger: "sentinel-analyze".to_string(),
        proposal: "proposal-pending".to_string(),
        approved: "approved".to_string(),
        working: "implementing".to_string(),
    };
    let git = GitConfig {
        branch_prefix: "sentinel/issue-".to_string(),
        base_branch: "main".to_string(),
        user_name: "Sentinel System".to_string(),
        user_email: "sentinel@github-app.local".to_string(),
    };

    let config = Config {
        port: 0,
        webhook_secret: webhook_secret.map(String::from),
        github: GitHubConfig {
            token: Some(TOKEN.to_string()),
            repository: Some(REPO.to_string()),
            app_id: None,
            private_key_path: None,
            installation_ids: vec![],
            api_base: api_base.to_string(),
            clone_base: clone_base.to_string(),
        },
        labels: labels.clone(),
        git: git.clone(),
        workspace_base_dir: workspace_base.to_path_buf(),
        agent: AgentConfig {
            command: "aider".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key: None,
        },
    };

    let github = Arc::new(
        GitHubClient::with_token(TOKEN, REPO, api_base, clone_base).expect("client setup"),
    );
    let workspaces = Arc::new(WorkspaceManager::new(workspace_base.to_path_buf(), git.clone()));
    let processor = Arc::new(IssueProcessor::new(
        github.clone(),
        agent.clone(),
        workspaces,
        labels,
        git,
    ));

    AppState {
        config,
        github,
        processor,
        agent,
    }
}

/// Serve the router on an ephemeral port and return its base URL.
pub async fn spawn_app(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server");
    });
    format!("http://{addr}")
}

/// Issue payload as the GitHub API would return it.
pub fn issue_json(number: u64, labels: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "number": number,
        "title": "Crash on empty input",
        "body": "Steps to reproduce: run with no arguments.",
        "state": "open",
        "html_url": format!("https://github.com/{REPO}/issues/{number}"),
        "labels": labels.iter().map(|l| serde_json::json!({"name": l})).collect::<Vec<_>>(),
        "user": {"login": "octocat"}
    })
}

/// Mount the mocks every processing flow needs: issue fetch, label
/// mutations, comments, and PR creation.
pub async fn mount_github_mocks(server: &wiremock::MockServer, issue: serde_json::Value) {
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, ResponseTemplate};

    Mock::given(method("GET"))
        .and(path(format!("/repos/{REPO}/issues/{}", issue["number"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(issue))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/repos/{REPO}/issues/42/labels")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(format!(
            r"^/repos/{REPO}/issues/\d+/labels/.+$"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/repos/{REPO}/issues/42/comments")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/repos/{REPO}/issues/42/comments")))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(serde_json::json!({"id": 1, "body": "recorded"})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/repos/{REPO}/pulls")))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "number": 5,
            "html_url": format!("https://github.com/{REPO}/pull/5"),
            "title": "Fix issue #42: Crash on empty input"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/repos/{REPO}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "full_name": REPO,
            "default_branch": "main"
        })))
        .mount(server)
        .await;
}

/// Requests recorded by the mock server.
pub async fn recorded(server: &wiremock::MockServer) -> Vec<wiremock::Request> {
    server.received_requests().await.unwrap_or_default()
}

/// Recorded requests matching a method and exact path.
pub fn hits<'a>(
    requests: &'a [wiremock::Request],
    method: &str,
    path: &str,
) -> Vec<&'a wiremock::Request> {
    requests
        .iter()
        .filter(|r| r.method.as_str() == method && r.url.path() == path)
        .collect()
}

/// Poll until `check` passes or the timeout elapses.
pub async fn wait_for<F, Fut>(mut check: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
