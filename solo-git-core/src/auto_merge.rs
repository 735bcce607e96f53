//! Auto-merge workflow: runs a workpad's tests, evaluates the promotion
//! gate, promotes on approval, and optionally drives a post-merge CI smoke
//! pipeline with automatic rollback (§4.5).

use std::time::Duration;

use crate::ci_orchestrator::{CiOrchestrator, CiResult, CiStatus};
use crate::config::Config;
use crate::git_state_sync::GitStateSync;
use crate::model::{PromotionDecisionType, TestRunStatus, TestVerdict};
use crate::promotion_gate::{PromotionContext, PromotionDecision, PromotionGate, PromotionRules};
use crate::rollback_handler::RollbackHandler;
use crate::test_analyzer::{TestAnalysis, TestAnalyzer};
use crate::test_orchestrator::{TestConfig, TestOrchestrator};

#[derive(Debug, Clone)]
pub struct AutoMergeResult {
    pub success: bool,
    pub pad_id: String,
    pub commit_hash: Option<String>,
    pub test_analysis: Option<TestAnalysis>,
    pub promotion_decision: Option<PromotionDecision>,
    pub ci_result: Option<CiResult>,
    pub message: String,
    pub details: Vec<String>,
}

impl AutoMergeResult {
    fn new(pad_id: &str) -> Self {
        Self {
            success: false,
            pad_id: pad_id.to_string(),
            commit_hash: None,
            test_analysis: None,
            promotion_decision: None,
            ci_result: None,
            message: String::new(),
            details: Vec::new(),
        }
    }
}

pub struct AutoMergeWorkflow<'a> {
    sync: &'a GitStateSync,
    test_orchestrator: &'a TestOrchestrator,
    test_analyzer: TestAnalyzer,
    promotion_gate: PromotionGate,
    ci_smoke_tests: Vec<TestConfig>,
    ci_auto_run: bool,
    ci_command: Option<String>,
    ci_webhook: Option<String>,
    ci_webhook_timeout: Duration,
    rollback_on_ci_red: bool,
}

impl<'a> AutoMergeWorkflow<'a> {
    pub fn new(
        sync: &'a GitStateSync,
        test_orchestrator: &'a TestOrchestrator,
        promotion_rules: PromotionRules,
        ci_smoke_tests: Vec<TestConfig>,
        cfg: &Config,
    ) -> Self {
        Self {
            sync,
            test_orchestrator,
            test_analyzer: TestAnalyzer::new(),
            promotion_gate: PromotionGate::new(promotion_rules),
            ci_smoke_tests,
            ci_auto_run: cfg.ci_auto_run,
            ci_command: cfg.ci_command.clone(),
            ci_webhook: cfg.ci_webhook.clone(),
            ci_webhook_timeout: cfg.ci_webhook_timeout,
            rollback_on_ci_red: cfg.rollback_on_ci_red,
        }
    }

    /// Run the full ten-step sequence: test, analyze, gate, promote, CI,
    /// rollback, record. Every failure mode short-circuits into a populated
    /// [`AutoMergeResult`] rather than propagating an error — the workflow
    /// layer's job is to report what happened, not to fail the caller.
    pub fn execute(&self, pad_id: &str, tests: &[TestConfig], parallel: bool, auto_promote: bool, target: &str) -> AutoMergeResult {
        let mut result = AutoMergeResult::new(pad_id);

        let Some(workpad) = self.sync.get_workpad(pad_id) else {
            result.message = format!("Workpad {pad_id} not found");
            result.details.push(result.message.clone());
            return result;
        };
        let repo_id = workpad.repo_id.clone();

        result.details.push(format!("Workpad: {}", workpad.title));
        result.details.push(format!("Target: {target}"));

        let test_run_id = self.start_test_run(pad_id, target);

        result.details.push(format!("Running {} tests...", tests.len()));
        let test_results = match self.test_orchestrator.run_tests_sync(self.sync.git_engine(), pad_id, tests, parallel) {
            Ok(results) => results,
            Err(e) => {
                result.message = format!("Test execution failed: {e}");
                result.details.push(result.message.clone());
                self.finalize_test_run(&test_run_id, TestRunStatus::Failed, TestVerdict::Red, &[]);
                return result;
            }
        };
        let total_duration_s = test_results.iter().map(|r| r.duration_ms).sum::<u64>() as f64 / 1000.0;
        result.details.push(format!("Tests completed in {total_duration_s:.1}s"));

        result.details.push("Analyzing test results...".to_string());
        let analysis = self.test_analyzer.analyze(&test_results);
        result.details.push(format!("Status: {}", analysis.status.to_uppercase()));
        result.details.push(format!("Passed: {}/{}", analysis.passed, analysis.total_tests));

        if analysis.status != "green" {
            result.details.push(format!("Failed: {}", analysis.failed));
            if analysis.timeout > 0 {
                result.details.push(format!("Timeout: {}", analysis.timeout));
            }
            if analysis.error > 0 {
                result.details.push(format!("Error: {}", analysis.error));
            }
            for pattern in analysis.failure_patterns.iter().take(3) {
                result.details.push(format!("  - {:?}: {}", pattern.category, truncate(&pattern.message, 80)));
            }
            for action in analysis.suggested_actions.iter().take(3) {
                result.details.push(format!("  - {action}"));
            }
        }

        let verdict = if analysis.status == "green" { TestVerdict::Green } else { TestVerdict::Red };
        let run_status = if analysis.status == "green" { TestRunStatus::Passed } else { TestRunStatus::Failed };
        self.finalize_test_run(&test_run_id, run_status, verdict, &test_results);
        result.test_analysis = Some(analysis.clone());

        result.details.push("Evaluating promotion gate...".to_string());
        let ctx = self.build_promotion_context(pad_id, &analysis, !tests.is_empty());
        let decision = self.promotion_gate.evaluate(&ctx);
        for reason in decision.reasons.iter().take(5) {
            result.details.push(reason.clone());
        }
        for warning in &decision.warnings {
            result.details.push(warning.clone());
        }
        result.promotion_decision = Some(decision.clone());

        let can_promote = decision.decision == PromotionDecisionType::Approve;

        if can_promote && auto_promote {
            result.details.push("Auto-promoting to trunk...".to_string());
            match self.sync.promote_workpad(pad_id) {
                Ok(commit_hash) => {
                    result.details.push(format!("Promoted to trunk: {}", &commit_hash[..commit_hash.len().min(8)]));
                    result.commit_hash = Some(commit_hash);
                    result.success = true;
                    result.message = "Successfully promoted to trunk".to_string();
                }
                Err(e) => {
                    result.message = format!("Promotion failed: {e}");
                    result.details.push(result.message.clone());
                    return result;
                }
            }
        } else if can_promote {
            result.message = "Tests passed, ready to promote (auto-promote disabled)".to_string();
            result.details.push(result.message.clone());
        } else {
            result.message = "Cannot promote - promotion gate rejected".to_string();
            result.details.push(result.message.clone());
            if decision.decision == PromotionDecisionType::ManualReview {
                result.details.push("Manual review required".to_string());
            }
        }

        let mut ci_result = None;
        if let Some(commit_hash) = result.commit_hash.clone() {
            ci_result = self.run_ci_pipeline(&repo_id, &commit_hash, &mut result);
            if let Some(ci) = &ci_result {
                if ci.is_red() {
                    result.success = false;
                    if result.message.contains("Successfully promoted") {
                        result.message = "Promotion rolled back due to failed CI smoke tests".to_string();
                    }
                }
            }
            result.ci_result = ci_result.clone();
        }

        let promoted = result.commit_hash.is_some()
            && !(ci_result.as_ref().map(|c| c.is_red()).unwrap_or(false) && self.rollback_on_ci_red);

        let _ = self.sync.record_promotion(
            &repo_id,
            pad_id,
            decision.decision,
            ctx.can_fast_forward,
            auto_promote,
            promoted,
            result.commit_hash.clone(),
            &result.message,
        );

        result
    }

    fn start_test_run(&self, pad_id: &str, target: &str) -> Option<String> {
        match self.sync.state_manager().create_test_run(Some(pad_id), target) {
            Ok(run) => Some(run.run_id),
            Err(e) => {
                eprintln!("warning: failed to record test run start for {pad_id}: {e}");
                None
            }
        }
    }

    fn finalize_test_run(&self, run_id: &Option<String>, status: TestRunStatus, verdict: TestVerdict, test_results: &[crate::test_orchestrator::TestResult]) {
        let Some(run_id) = run_id else { return };
        if let Err(e) = self.sync.record_test_completion(run_id, status, verdict, test_results) {
            eprintln!("warning: failed to finalize test run {run_id}: {e}");
        }
    }

    fn build_promotion_context(&self, pad_id: &str, analysis: &TestAnalysis, tests_run: bool) -> PromotionContext {
        let can_fast_forward = self.sync.git_engine().can_promote(pad_id).unwrap_or(false);
        let (files_changed, lines_changed) = self
            .sync
            .get_diff(pad_id, "trunk")
            .map(|d| diff_stats(&d))
            .unwrap_or((0, 0));

        PromotionContext {
            tests_run,
            tests_passed: analysis.status == "green",
            test_status: Some(analysis.status.clone()),
            can_fast_forward,
            files_changed,
            lines_changed,
            coverage_percent: None,
        }
    }

    /// Run every configured CI channel (smoke tests, external command,
    /// webhook) and fold them into a single [`CiResult`] — any channel
    /// reporting failure flips the aggregate to `Failure`.
    fn run_ci_pipeline(&self, repo_id: &str, commit_hash: &str, result: &mut AutoMergeResult) -> Option<CiResult> {
        if !self.ci_auto_run {
            return None;
        }

        result.details.push("Triggering CI smoke job...".to_string());
        let mut ci_result: Option<CiResult> = None;

        if !self.ci_smoke_tests.is_empty() {
            let ci = CiOrchestrator::new(self.sync.git_engine(), self.test_orchestrator);
            let run = ci.run_smoke_tests(repo_id, commit_hash, &self.ci_smoke_tests);
            result.details.push(format!("Smoke tests: {:?} - {}", run.status, run.message));
            ci_result = Some(run);
        }

        if let Some(command) = self.ci_command.clone() {
            let (success, message) = run_ci_command(&command, repo_id, commit_hash);
            let label = if success { "ok" } else { "failed" };
            let trimmed = truncate(message.trim(), 120);
            let mut line = format!("CI command ({label}): {command}");
            if !trimmed.is_empty() {
                line.push_str(&format!(" -> {trimmed}"));
            }
            result.details.push(line);
            ci_result = Some(merge_channel_outcome(ci_result, repo_id, commit_hash, success, format!("CI command failed: {message}"), "CI command succeeded"));
        }

        if let Some(webhook) = self.ci_webhook.clone() {
            let (success, message) = trigger_ci_webhook(&webhook, repo_id, commit_hash, self.ci_webhook_timeout);
            let label = if success { "ok" } else { "failed" };
            let trimmed = truncate(message.trim(), 120);
            let mut line = format!("CI webhook ({label}): {webhook}");
            if !trimmed.is_empty() {
                line.push_str(&format!(" -> {trimmed}"));
            }
            result.details.push(line);
            ci_result = Some(merge_channel_outcome(ci_result, repo_id, commit_hash, success, format!("CI webhook failed: {message}"), "CI webhook triggered"));
        }

        if let Some(ci) = &ci_result {
            if ci.is_red() && self.rollback_on_ci_red {
                let handler = RollbackHandler::new(self.sync.git_engine());
                let rollback = handler.handle_failed_ci(ci, true);
                let label = if rollback.success { "ok" } else { "failed" };
                result.details.push(format!("Rollback ({label}): {}", rollback.message));
            }
        }

        ci_result
    }
}

fn merge_channel_outcome(existing: Option<CiResult>, repo_id: &str, commit_hash: &str, success: bool, failure_message: String, success_message: &str) -> CiResult {
    match existing {
        Some(mut ci) if !success => {
            ci.status = CiStatus::Failure;
            ci.message = failure_message;
            ci
        }
        Some(ci) => ci,
        None if !success => CiResult {
            repo_id: repo_id.to_string(),
            commit_hash: commit_hash.to_string(),
            status: CiStatus::Failure,
            duration_ms: 0,
            test_results: Vec::new(),
            message: failure_message,
        },
        None => CiResult {
            repo_id: repo_id.to_string(),
            commit_hash: commit_hash.to_string(),
            status: CiStatus::Success,
            duration_ms: 0,
            test_results: Vec::new(),
            message: success_message.to_string(),
        },
    }
}

fn run_ci_command(command: &str, repo_id: &str, commit_hash: &str) -> (bool, String) {
    if command.trim().is_empty() {
        return (true, String::new());
    }

    let output = std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .env("SOLOGIT_REPO_ID", repo_id)
        .env("SOLOGIT_COMMIT", commit_hash)
        .output();

    match output {
        Ok(out) => {
            let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            let message = if !stdout.is_empty() { stdout } else { stderr };
            (out.status.success(), message)
        }
        Err(e) => (false, e.to_string()),
    }
}

fn trigger_ci_webhook(url: &str, repo_id: &str, commit_hash: &str, timeout: Duration) -> (bool, String) {
    let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => return (false, e.to_string()),
    };

    let response = client
        .post(url)
        .json(&serde_json::json!({ "repo_id": repo_id, "commit": commit_hash }))
        .send();

    match response {
        Ok(resp) => {
            let success = resp.status().as_u16() < 400;
            let message = resp.text().unwrap_or_default();
            (success, message)
        }
        Err(e) => (false, e.to_string()),
    }
}

/// Approximate `git diff --stat`: count distinct file headers and changed
/// (`+`/`-`) body lines, skipping the `+++`/`---` file-path lines.
fn diff_stats(diff: &str) -> (u32, u32) {
    let mut files = 0u32;
    let mut lines = 0u32;
    for line in diff.lines() {
        if line.starts_with("diff --git ") {
            files += 1;
        } else if (line.starts_with('+') && !line.starts_with("+++")) || (line.starts_with('-') && !line.starts_with("---")) {
            lines += 1;
        }
    }
    (files, lines)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git_engine::GitEngine;
    use crate::state::{JsonStateBackend, StateManager};
    use crate::test_orchestrator::ExecutionModePreference;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        sync: GitStateSync,
        orch: TestOrchestrator,
        _git_dir: TempDir,
        _state_dir: TempDir,
        _log_dir: TempDir,
        repo_id: String,
    }

    fn fixture() -> Fixture {
        let git_dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        let log_dir = TempDir::new().unwrap();

        let git_engine = GitEngine::new(git_dir.path()).unwrap();
        let backend = Arc::new(JsonStateBackend::new(state_dir.path()).unwrap());
        let state_manager = StateManager::new(backend);
        let sync = GitStateSync::new(git_engine, state_manager);
        let repo = sync.create_empty_repo("demo").unwrap();
        let orch = TestOrchestrator::new("irrelevant", ExecutionModePreference::Subprocess, log_dir.path()).unwrap();

        Fixture { sync, orch, _git_dir: git_dir, _state_dir: state_dir, _log_dir: log_dir, repo_id: repo.repo_id }
    }

    fn default_cfg(state_dir: &std::path::Path) -> Config {
        Config::load(state_dir).unwrap()
    }

    #[test]
    fn passing_tests_auto_promote_to_trunk() {
        let f = fixture();
        let pad = f.sync.create_workpad(&f.repo_id, "feature").unwrap();
        let patch = "--- /dev/null\n+++ b/a.txt\n@@ -0,0 +1 @@\n+hi\n";
        f.sync.apply_patch(&pad.workpad_id, patch, None).unwrap();

        let state_dir = TempDir::new().unwrap();
        let cfg = default_cfg(state_dir.path());
        let workflow = AutoMergeWorkflow::new(&f.sync, &f.orch, PromotionRules::default(), Vec::new(), &cfg);

        let tests = vec![TestConfig::new("unit", "true")];
        let result = workflow.execute(&pad.workpad_id, &tests, true, true, "fast");

        assert!(result.success);
        assert!(result.commit_hash.is_some());
        assert_eq!(result.promotion_decision.unwrap().decision, PromotionDecisionType::Approve);
    }

    #[test]
    fn failing_tests_block_promotion() {
        let f = fixture();
        let pad = f.sync.create_workpad(&f.repo_id, "feature").unwrap();
        let patch = "--- /dev/null\n+++ b/a.txt\n@@ -0,0 +1 @@\n+hi\n";
        f.sync.apply_patch(&pad.workpad_id, patch, None).unwrap();

        let state_dir = TempDir::new().unwrap();
        let cfg = default_cfg(state_dir.path());
        let workflow = AutoMergeWorkflow::new(&f.sync, &f.orch, PromotionRules::default(), Vec::new(), &cfg);

        let tests = vec![TestConfig::new("unit", "false")];
        let result = workflow.execute(&pad.workpad_id, &tests, true, true, "fast");

        assert!(!result.success);
        assert!(result.commit_hash.is_none());
        assert_eq!(result.promotion_decision.unwrap().decision, PromotionDecisionType::Reject);
    }

    #[test]
    fn approved_but_auto_promote_disabled_leaves_workpad_untouched() {
        let f = fixture();
        let pad = f.sync.create_workpad(&f.repo_id, "feature").unwrap();
        let patch = "--- /dev/null\n+++ b/a.txt\n@@ -0,0 +1 @@\n+hi\n";
        f.sync.apply_patch(&pad.workpad_id, patch, None).unwrap();

        let state_dir = TempDir::new().unwrap();
        let cfg = default_cfg(state_dir.path());
        let workflow = AutoMergeWorkflow::new(&f.sync, &f.orch, PromotionRules::default(), Vec::new(), &cfg);

        let tests = vec![TestConfig::new("unit", "true")];
        let result = workflow.execute(&pad.workpad_id, &tests, true, false, "fast");

        assert!(result.commit_hash.is_none());
        assert!(result.message.contains("auto-promote disabled"));
    }

    #[test]
    fn promotion_decision_is_recorded_in_state() {
        let f = fixture();
        let pad = f.sync.create_workpad(&f.repo_id, "feature").unwrap();
        let patch = "--- /dev/null\n+++ b/a.txt\n@@ -0,0 +1 @@\n+hi\n";
        f.sync.apply_patch(&pad.workpad_id, patch, None).unwrap();

        let state_dir = TempDir::new().unwrap();
        let cfg = default_cfg(state_dir.path());
        let workflow = AutoMergeWorkflow::new(&f.sync, &f.orch, PromotionRules::default(), Vec::new(), &cfg);
        let tests = vec![TestConfig::new("unit", "true")];
        workflow.execute(&pad.workpad_id, &tests, true, true, "fast");

        let records = f.sync.state_manager().list_promotion_records(Some(&f.repo_id), None, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].decision, PromotionDecisionType::Approve);
    }

    #[test]
    fn diff_stats_counts_files_and_changed_lines() {
        let diff = "diff --git a/a.txt b/a.txt\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1,2 @@\n-old\n+new\n+extra\n";
        assert_eq!(diff_stats(diff), (1, 3));
    }
}
