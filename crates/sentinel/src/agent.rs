//! AI coding agent integration.
//!
//! Orchestration only depends on the [`CodingAgent`] trait; the shipped
//! implementation shells out to the `aider` CLI in the cloned workspace.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::{SentinelError, SentinelResult};
use crate::models::Issue;

/// Section headers a well-formed proposal must contain.
const REQUIRED_SECTIONS: [&str; 3] = ["## 🔍", "## 💡", "## 📋"];

/// Maximum repository files handed to the CLI as context.
const MAX_CONTEXT_FILES: usize = 10;

/// Capability seam for the AI coding tool.
#[async_trait]
pub trait CodingAgent: Send + Sync {
    /// Analyze an issue against the cloned repository and produce a
    /// markdown proposal. Must not modify the workspace.
    async fn analyze(&self, issue: &Issue, workspace: &Path) -> SentinelResult<String>;

    /// Apply the approved proposal to the workspace and return an
    /// implementation summary.
    async fn implement(
        &self,
        issue: &Issue,
        proposal: &str,
        workspace: &Path,
    ) -> SentinelResult<String>;

    /// Re-run analysis with human feedback on a previous proposal.
    async fn refine(
        &self,
        issue: &Issue,
        previous: &str,
        feedback: &str,
        workspace: &Path,
    ) -> SentinelResult<String>;

    /// Probe that the tool is installed; returns version info.
    async fn availability(&self) -> SentinelResult<String>;
}

/// `aider` CLI backend.
pub struct AiderAgent {
    command: String,
    model: String,
    api_key: Option<String>,
}

impl AiderAgent {
    #[must_use]
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }

    async fn run(
        &self,
        workspace: &Path,
        dry_run: bool,
        message: &str,
        files: &[PathBuf],
    ) -> SentinelResult<String> {
        let mut cmd = Command::new(&self.command);
        cmd.current_dir(workspace)
            .arg("--model")
            .arg(&self.model)
            .arg("--no-auto-commits")
            .arg("--no-check-update")
            .arg("--yes")
            .arg("--no-stream");
        if dry_run {
            cmd.arg("--dry-run");
        }
        cmd.arg("--message").arg(message);
        for file in files {
            cmd.arg(file);
        }
        if let Some(key) = &self.api_key {
            cmd.env("ANTHROPIC_API_KEY", key);
        }
        cmd.stdin(Stdio::null());

        debug!(
            command = %self.command,
            model = %self.model,
            dry_run = dry_run,
            context_files = files.len(),
            "Invoking coding agent"
        );

        let output = cmd.output().await.map_err(|e| SentinelError::AiService {
            reason: format!("failed to spawn '{}': {e}", self.command),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.chars().rev().take(1000).collect::<String>();
            let tail: String = tail.chars().rev().collect();
            return Err(SentinelError::AiService {
                reason: format!(
                    "'{}' exited with {}: {}",
                    self.command,
                    output.status,
                    tail.trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl CodingAgent for AiderAgent {
    async fn analyze(&self, issue: &Issue, workspace: &Path) -> SentinelResult<String> {
        let files = context_files(workspace);
        let prompt = analysis_prompt(issue);
        let raw = self.run(workspace, true, &prompt, &files).await?;

        let cleaned = clean_output(&raw);
        if has_required_sections(&cleaned) {
            Ok(cleaned)
        } else {
            warn!(
                issue = issue.number,
                "Agent output lacked proposal sections, using fallback template"
            );
            Ok(fallback_proposal(issue))
        }
    }

    async fn implement(
        &self,
        issue: &Issue,
        proposal: &str,
        workspace: &Path,
    ) -> SentinelResult<String> {
        let files = context_files(workspace);
        let prompt = implementation_prompt(issue, proposal);
        let raw = self.run(workspace, false, &prompt, &files).await?;

        scrub_workspace(workspace);

        let summary = clean_output(&raw);
        info!(issue = issue.number, "Agent implementation run finished");
        if summary.trim().is_empty() {
            Ok(format!("Implemented changes for issue #{}.", issue.number))
        } else {
            Ok(summary)
        }
    }

    async fn refine(
        &self,
        issue: &Issue,
        previous: &str,
        feedback: &str,
        workspace: &Path,
    ) -> SentinelResult<String> {
        let files = context_files(workspace);
        let prompt = refinement_prompt(issue, previous, feedback);
        let raw = self.run(workspace, true, &prompt, &files).await?;

        let cleaned = clean_output(&raw);
        if has_required_sections(&cleaned) {
            Ok(cleaned)
        } else {
            Ok(fallback_proposal(issue))
        }
    }

    async fn availability(&self) -> SentinelResult<String> {
        let output = Command::new(&self.command)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SentinelError::AiService {
                reason: format!("'{}' is not available: {e}", self.command),
            })?;

        if !output.status.success() {
            return Err(SentinelError::AiService {
                reason: format!("'{} --version' exited with {}", self.command, output.status),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn issue_context(issue: &Issue) -> String {
    format!(
        "Issue #{}: {}\n\n{}",
        issue.number,
        issue.title,
        issue.body.as_deref().unwrap_or("(no description provided)")
    )
}

fn analysis_prompt(issue: &Issue) -> String {
    format!(
        "Analyze the following GitHub issue against this repository and produce a \
         resolution proposal. Do NOT modify any files.\n\n{}\n\n\
         Respond in markdown with exactly these sections:\n\
         ## 🔍 Problem Analysis\n\
         ## 💡 Proposed Solution\n\
         ## 📋 Implementation Plan\n\
         ## 📁 Files to Modify\n",
        issue_context(issue)
    )
}

fn implementation_prompt(issue: &Issue, proposal: &str) -> String {
    format!(
        "Implement the approved proposal below for this GitHub issue. Make the \
         code changes directly in the repository files.\n\n{}\n\n\
         Approved proposal:\n{proposal}\n\n\
         Keep the changes minimal and focused on the issue.",
        issue_context(issue)
    )
}

fn refinement_prompt(issue: &Issue, previous: &str, feedback: &str) -> String {
    format!(
        "A previous resolution proposal for this GitHub issue was rejected. \
         Produce a revised proposal addressing the feedback. Do NOT modify any \
         files.\n\n{}\n\nPrevious proposal:\n{previous}\n\n\
         Reviewer feedback:\n{feedback}\n\n\
         Respond in markdown with exactly these sections:\n\
         ## 🔍 Problem Analysis\n\
         ## 💡 Proposed Solution\n\
         ## 📋 Implementation Plan\n\
         ## 📁 Files to Modify\n",
        issue_context(issue)
    )
}

/// Pick repository files worth handing to the CLI as context: top-level
/// docs and manifests plus a handful of source files.
#[must_use]
pub fn context_files(workspace: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let manifests = [
        "README.md",
        "README.rst",
        "README.txt",
        "Cargo.toml",
        "pyproject.toml",
        "package.json",
        "go.mod",
    ];
    for name in manifests {
        let candidate = workspace.join(name);
        if candidate.is_file() {
            files.push(PathBuf::from(name));
        }
    }

    let source_exts = ["rs", "py", "js", "ts", "go"];
    for dir in ["src", "lib", "app"] {
        let Ok(entries) = std::fs::read_dir(workspace.join(dir)) else {
            continue;
        };
        let mut names: Vec<_> = entries
            .filter_map(Result::ok)
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| source_exts.contains(&ext))
            })
            .map(|e| PathBuf::from(dir).join(e.file_name()))
            .collect();
        names.sort();
        for name in names {
            if files.len() >= MAX_CONTEXT_FILES {
                return files;
            }
            files.push(name);
        }
    }

    files
}

/// Strip CLI noise from agent output: banners, token accounting, edit-block
/// markers, and leading chatter before the first proposal section.
#[must_use]
pub fn clean_output(raw: &str) -> String {
    let noise_prefixes = [
        "aider v",
        "Model:",
        "Git repo:",
        "Repo-map:",
        "Added ",
        "Tokens:",
        "Cost:",
        "Dry run enabled",
        "Scanning repo",
        "Use /help",
        "Warning:",
        "Update git email",
    ];

    let mut lines = Vec::new();
    let mut in_edit_block = false;
    for line in raw.lines() {
        if line.trim_start().starts_with("<<<<<<< SEARCH") {
            in_edit_block = true;
            continue;
        }
        if in_edit_block {
            if line.trim_start().starts_with(">>>>>>> REPLACE") {
                in_edit_block = false;
            }
            continue;
        }
        if noise_prefixes.iter().any(|p| line.starts_with(p)) {
            continue;
        }
        lines.push(line);
    }
    let mut cleaned = lines.join("\n");

    // Drop chatter ahead of the first proposal section when one exists
    if let Some(pos) = cleaned.find("## 🔍") {
        cleaned = cleaned[pos..].to_string();
    }

    if let Ok(re) = Regex::new(r"\n{3,}") {
        cleaned = re.replace_all(&cleaned, "\n\n").to_string();
    }

    cleaned.trim().to_string()
}

/// Whether cleaned output carries the proposal section headers.
#[must_use]
pub fn has_required_sections(text: &str) -> bool {
    REQUIRED_SECTIONS.iter().all(|s| text.contains(s))
}

/// Templated proposal used when the agent output is unusable as-is.
#[must_use]
pub fn fallback_proposal(issue: &Issue) -> String {
    format!(
        "## 🔍 Problem Analysis\n\
         Automated analysis of issue #{number} (\"{title}\") did not produce a \
         structured report. The issue description should be treated as the \
         primary problem statement.\n\n\
         ## 💡 Proposed Solution\n\
         Resolve the issue as described, keeping the change minimal and adding \
         regression coverage for the reported behavior.\n\n\
         ## 📋 Implementation Plan\n\
         1. Reproduce the reported behavior.\n\
         2. Apply a focused fix.\n\
         3. Add or extend tests covering the fix.\n\n\
         ## 📁 Files to Modify\n\
         To be determined during implementation.",
        number = issue.number,
        title = issue.title
    )
}

/// Remove agent droppings from the workspace before change detection.
fn scrub_workspace(workspace: &Path) {
    let Ok(entries) = std::fs::read_dir(workspace) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(".aider") {
            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "Failed to remove agent artifact");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;

    fn sample_issue() -> Issue {
        Issue {
            number: 42,
            title: "Crash on empty input".to_string(),
            body: Some("Steps to reproduce...".to_string()),
            labels: vec![Label {
                name: "bug".to_string(),
                color: None,
                description: None,
            }],
            state: Some("open".to_string()),
            html_url: None,
            user: None,
        }
    }

    #[test]
    fn test_clean_output_strips_noise_and_chatter() {
        let raw = "aider v0.45.0\n\
                   Model: claude-sonnet-4-20250514\n\
                   Git repo: .git with 12 files\n\
                   Thinking about the issue...\n\
                   ## 🔍 Problem Analysis\n\
                   The parser panics on empty input.\n\
                   Tokens: 4.2k sent, 1.1k received.\n\
                   Cost: $0.02\n\
                   ## 💡 Proposed Solution\n\
                   Guard against empty slices.\n";
        let cleaned = clean_output(raw);

        assert!(cleaned.starts_with("## 🔍 Problem Analysis"));
        assert!(!cleaned.contains("aider v"));
        assert!(!cleaned.contains("Tokens:"));
        assert!(!cleaned.contains("Thinking about"));
        assert!(cleaned.contains("Guard against empty slices."));
    }

    #[test]
    fn test_clean_output_drops_edit_blocks() {
        let raw = "## 🔍 Summary\n\
                   src/parser.rs\n\
                   <<<<<<< SEARCH\n\
                   old code\n\
                   =======\n\
                   new code\n\
                   >>>>>>> REPLACE\n\
                   Done.\n";
        let cleaned = clean_output(raw);

        assert!(!cleaned.contains("SEARCH"));
        assert!(!cleaned.contains("old code"));
        assert!(!cleaned.contains("new code"));
        assert!(cleaned.contains("Done."));
    }

    #[test]
    fn test_clean_output_collapses_blank_runs() {
        let cleaned = clean_output("## 🔍 A\n\n\n\n\nB");
        assert_eq!(cleaned, "## 🔍 A\n\nB");
    }

    #[test]
    fn test_required_sections_and_fallback() {
        assert!(!has_required_sections("nothing useful"));

        let fallback = fallback_proposal(&sample_issue());
        assert!(has_required_sections(&fallback));
        assert!(fallback.contains("issue #42"));
        assert!(fallback.contains("Crash on empty input"));
    }

    #[test]
    fn test_prompts_carry_issue_context() {
        let issue = sample_issue();
        let analysis = analysis_prompt(&issue);
        assert!(analysis.contains("Issue #42: Crash on empty input"));
        assert!(analysis.contains("Do NOT modify any files"));

        let implementation = implementation_prompt(&issue, "the plan");
        assert!(implementation.contains("the plan"));
        assert!(implementation.contains("Issue #42"));

        let refinement = refinement_prompt(&issue, "old plan", "too invasive");
        assert!(refinement.contains("old plan"));
        assert!(refinement.contains("too invasive"));
    }

    #[test]
    fn test_context_files_selection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# readme").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/notes.txt"), "").unwrap();

        let files = context_files(dir.path());
        assert!(files.contains(&PathBuf::from("README.md")));
        assert!(files.contains(&PathBuf::from("Cargo.toml")));
        assert!(files.contains(&PathBuf::from("src/lib.rs")));
        assert!(!files.iter().any(|f| f.ends_with("notes.txt")));
        assert!(files.len() <= MAX_CONTEXT_FILES + 7);
    }
}
