//! Sentinel: label-driven GitHub issue resolution.
//!
//! A webhook-driven service that analyzes labeled issues with an AI coding
//! CLI, posts resolution proposals for human review, and on approval clones
//! the repository, implements the change, and opens a pull request.
//!
//! Workflow state lives entirely in GitHub issue labels; the service keeps
//! no local persistence.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod agent;
pub mod config;
pub mod error;
pub mod git;
pub mod github;
pub mod github_app;
pub mod models;
pub mod processor;
pub mod server;
pub mod webhooks;
pub mod workspace;

pub use agent::{AiderAgent, CodingAgent};
pub use config::Config;
pub use error::{SentinelError, SentinelResult};
pub use github::GitHubClient;
pub use processor::{IssueProcessor, ProcessOutcome, WorkflowState};
pub use server::{build_router, AppState};
pub use workspace::WorkspaceManager;
