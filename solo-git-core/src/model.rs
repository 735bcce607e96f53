//! Data model for the Solo Git state journal (§3).
//!
//! Every record here is an explicit, sum-typed, `serde`-codeable struct —
//! replacing the dynamically-tagged dataclasses the original implementation
//! built on `asdict`/`setattr`. Nothing here carries a mutable-default-value
//! footgun: every `Vec`/`HashMap` field is constructed per-record via
//! `Default::default()` or an explicit literal, never shared.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Where a repository's initial commit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoSource {
    Zip,
    Git,
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub path: String,
    pub trunk_branch: String,
    pub created_at: DateTime<Utc>,
    pub source: RepoSource,
    pub active_workpad_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkpadStatus {
    Active,
    Testing,
    Passed,
    Failed,
    Promoted,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestVerdict {
    Green,
    Red,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workpad {
    pub id: String,
    pub repo_id: String,
    pub title: String,
    pub branch_name: String,
    pub base_commit: String,
    pub status: WorkpadStatus,
    pub last_test_verdict: Option<TestVerdict>,
    /// The workpad tip after the most recent mutating Git operation. Named
    /// `current_commit`, not the original's `last_commit` — see DESIGN.md.
    pub current_commit: Option<String>,
    pub checkpoints: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workpad {
    pub fn new(id: String, repo_id: String, title: String, branch_name: String, base_commit: String) -> Self {
        let ts = now();
        Self {
            id,
            repo_id,
            title,
            branch_name,
            base_commit,
            status: WorkpadStatus::Active,
            last_test_verdict: None,
            current_commit: None,
            checkpoints: Vec::new(),
            created_at: ts,
            updated_at: ts,
        }
    }
}

/// Snapshot of a Git commit for graph display (§3). Append-only; bounded by
/// the ring buffer in the state backend, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitNode {
    pub sha: String,
    pub short_sha: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub parent_sha: Option<String>,
    pub workpad_id: Option<String>,
    pub test_verdict: Option<TestVerdict>,
    pub ci_status: Option<String>,
    pub is_trunk: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Timeout,
    Error,
    Skipped,
}

/// Which sandbox a single test actually ran under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Docker,
    Subprocess,
}

/// Per-test result, persisted inside a [`TestRun`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub name: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub log_path: Option<String>,
    pub metrics: HashMap<String, f64>,
    pub mode: Option<ExecutionMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestRunStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub run_id: String,
    pub workpad_id: Option<String>,
    pub target: String,
    pub status: TestRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub duration_ms: u64,
    pub tests: Vec<TestResult>,
}

impl TestRun {
    pub fn new(run_id: String, workpad_id: Option<String>, target: String) -> Self {
        Self {
            run_id,
            workpad_id,
            target,
            status: TestRunStatus::Pending,
            started_at: now(),
            completed_at: None,
            total_tests: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            duration_ms: 0,
            tests: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AIOperationType {
    Planning,
    Coding,
    Reviewing,
    CommitMessage,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AIOperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Opaque from the core's viewpoint; included so workflows can attach an
/// AI-orchestrated operation to a workpad without the core depending on any
/// model-orchestration code (§1 Non-goals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIOperation {
    pub id: String,
    pub workpad_id: Option<String>,
    pub operation_type: AIOperationType,
    pub model: String,
    pub status: AIOperationStatus,
    pub prompt: String,
    pub response: Option<String>,
    pub tokens_used: u64,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionDecisionType {
    Approve,
    Reject,
    ManualReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub id: String,
    pub repo_id: String,
    pub workpad_id: String,
    pub decision: PromotionDecisionType,
    pub can_promote: bool,
    pub auto_promote_requested: bool,
    pub promoted: bool,
    pub commit_hash: Option<String>,
    pub message: String,
    pub test_run_id: Option<String>,
    pub ci_status: Option<String>,
    pub ci_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Closed event-type set (§6). No other string may appear in a [`StateEvent`]'s
/// `event_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RepoCreated,
    RepoUpdated,
    WorkpadCreated,
    WorkpadUpdated,
    WorkpadPromoted,
    WorkpadDeleted,
    TestStarted,
    TestCompleted,
    AiOperationStarted,
    AiOperationCompleted,
    CommitCreated,
    PromotionRecorded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEvent {
    pub id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: HashMap<String, serde_json::Value>,
}

/// Singleton representing "where the user currently is" (§3). Convenience
/// state for CLI/TUI callers, which are themselves out of scope here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    pub schema_version: u32,
    pub last_updated: DateTime<Utc>,
    pub active_repo_id: Option<String>,
    pub active_workpad_id: Option<String>,
    pub session_started_at: DateTime<Utc>,
    pub operation_count: u64,
    pub cumulative_cost: f64,
}

impl Default for GlobalState {
    fn default() -> Self {
        let ts = now();
        Self {
            schema_version: 1,
            last_updated: ts,
            active_repo_id: None,
            active_workpad_id: None,
            session_started_at: ts,
            operation_count: 0,
            cumulative_cost: 0.0,
        }
    }
}
