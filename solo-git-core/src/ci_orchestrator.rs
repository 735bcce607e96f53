//! Post-promotion smoke tests: a deliberately small stand-in for a real CI
//! system (Jenkins, GitHub Actions, ...) that runs a configured test battery
//! against the freshly-promoted trunk tip (§4.6).

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::git_engine::GitEngine;
use crate::test_orchestrator::{TestConfig, TestOrchestrator, TestResult, TestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Pending,
    Running,
    Success,
    Failure,
    Unstable,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiResult {
    pub repo_id: String,
    pub commit_hash: String,
    pub status: CiStatus,
    pub duration_ms: u64,
    pub test_results: Vec<TestResult>,
    pub message: String,
}

impl CiResult {
    pub fn is_green(&self) -> bool {
        self.status == CiStatus::Success
    }

    /// Unstable counts as red: a timeout that slipped through smoke tests is
    /// still a signal the promoted commit isn't safe.
    pub fn is_red(&self) -> bool {
        matches!(self.status, CiStatus::Failure | CiStatus::Unstable)
    }
}

/// Runs smoke tests against trunk directly through the [`GitEngine`], not
/// [`crate::git_state_sync::GitStateSync`]: the temporary workpad it spins up
/// to anchor the test run is throwaway scaffolding, not user-visible state.
pub struct CiOrchestrator<'a> {
    git_engine: &'a GitEngine,
    test_orchestrator: &'a TestOrchestrator,
}

impl<'a> CiOrchestrator<'a> {
    pub fn new(git_engine: &'a GitEngine, test_orchestrator: &'a TestOrchestrator) -> Self {
        Self { git_engine, test_orchestrator }
    }

    pub fn run_smoke_tests(&self, repo_id: &str, commit_hash: &str, smoke_tests: &[TestConfig]) -> CiResult {
        let start = Instant::now();

        if self.git_engine.get_repo(repo_id).is_none() {
            return CiResult {
                repo_id: repo_id.to_string(),
                commit_hash: commit_hash.to_string(),
                status: CiStatus::Failure,
                duration_ms: 0,
                test_results: Vec::new(),
                message: "repository not found".to_string(),
            };
        }

        let short = &commit_hash[..commit_hash.len().min(8)];
        let temp_pad_id = match self.git_engine.create_workpad(repo_id, &format!("ci-smoke-{short}")) {
            Ok(id) => id,
            Err(e) => {
                return CiResult {
                    repo_id: repo_id.to_string(),
                    commit_hash: commit_hash.to_string(),
                    status: CiStatus::Failure,
                    duration_ms: start.elapsed().as_millis() as u64,
                    test_results: Vec::new(),
                    message: format!("failed to create smoke-test workpad: {e}"),
                }
            }
        };

        let run = self.test_orchestrator.run_tests_sync(self.git_engine, &temp_pad_id, smoke_tests, true);

        // best-effort cleanup regardless of outcome; never merged, so force it.
        let _ = self.git_engine.delete_workpad(&temp_pad_id, true);

        let duration_ms = start.elapsed().as_millis() as u64;

        match run {
            Ok(results) => {
                let all_passed = results.iter().all(|r| r.status == TestStatus::Passed);
                let any_timeout = results.iter().any(|r| r.status == TestStatus::Timeout);

                let (status, message) = if all_passed {
                    (CiStatus::Success, "All smoke tests passed".to_string())
                } else if any_timeout {
                    (CiStatus::Unstable, "Some tests timed out".to_string())
                } else {
                    let failed = results.iter().filter(|r| r.status != TestStatus::Passed).count();
                    (CiStatus::Failure, format!("{failed} tests failed"))
                };

                CiResult { repo_id: repo_id.to_string(), commit_hash: commit_hash.to_string(), status, duration_ms, test_results: results, message }
            }
            Err(e) => CiResult {
                repo_id: repo_id.to_string(),
                commit_hash: commit_hash.to_string(),
                status: CiStatus::Failure,
                duration_ms,
                test_results: Vec::new(),
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_orchestrator::ExecutionModePreference;
    use tempfile::TempDir;

    fn setup() -> (GitEngine, TestOrchestrator, TempDir, TempDir, String) {
        let git_dir = TempDir::new().unwrap();
        let log_dir = TempDir::new().unwrap();
        let engine = GitEngine::new(git_dir.path()).unwrap();
        let orch = TestOrchestrator::new("irrelevant", ExecutionModePreference::Subprocess, log_dir.path()).unwrap();
        let repo_id = engine.create_empty_repo("demo", None).unwrap();
        (engine, orch, git_dir, log_dir, repo_id)
    }

    #[test]
    fn all_passing_smoke_tests_are_green() {
        let (engine, orch, _g, _l, repo_id) = setup();
        let ci = CiOrchestrator::new(&engine, &orch);
        let tests = vec![TestConfig::new("smoke", "true")];
        let result = ci.run_smoke_tests(&repo_id, "deadbeefcafe", &tests);
        assert!(result.is_green());
        assert!(!result.is_red());
    }

    #[test]
    fn failing_smoke_test_is_red_failure() {
        let (engine, orch, _g, _l, repo_id) = setup();
        let ci = CiOrchestrator::new(&engine, &orch);
        let tests = vec![TestConfig::new("smoke", "false")];
        let result = ci.run_smoke_tests(&repo_id, "deadbeefcafe", &tests);
        assert_eq!(result.status, CiStatus::Failure);
        assert!(result.is_red());
    }

    #[test]
    fn smoke_test_workpad_is_cleaned_up() {
        let (engine, orch, _g, _l, repo_id) = setup();
        let ci = CiOrchestrator::new(&engine, &orch);
        let tests = vec![TestConfig::new("smoke", "true")];
        ci.run_smoke_tests(&repo_id, "deadbeefcafe", &tests);
        assert!(engine.list_workpads(&repo_id).is_empty());
    }

    #[test]
    fn unknown_repo_fails_without_panicking() {
        let (engine, orch, _g, _l, _repo_id) = setup();
        let ci = CiOrchestrator::new(&engine, &orch);
        let result = ci.run_smoke_tests("not-a-repo", "deadbeef", &[]);
        assert_eq!(result.status, CiStatus::Failure);
    }
}
