//! High-level state manager: owns ID generation, event emission, cascading
//! deletes, and the global "where is the user" singleton (§4.7).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::StateError;
use crate::model::{
    now, AIOperation, AIOperationStatus, AIOperationType, CommitNode, EventType, GlobalState, PromotionDecisionType, PromotionRecord,
    Repository, StateEvent, TestResult, TestRun, TestRunStatus, TestStatus, TestVerdict, Workpad, WorkpadStatus,
};
use crate::state::backend::StateBackend;

type Result<T> = std::result::Result<T, StateError>;

pub struct StateManager {
    backend: Arc<dyn StateBackend>,
}

impl StateManager {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    fn emit_event(&self, event_type: EventType, data: HashMap<String, serde_json::Value>) -> Result<()> {
        let event = StateEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp: now(),
            data,
        };
        self.backend.write_event(&event)
    }

    // ── Global state ─────────────────────────────────────────────────

    pub fn get_global_state(&self) -> Result<GlobalState> {
        self.backend.read_global_state()
    }

    /// Set the active repository (and, if `workpad_id` is given, the active
    /// workpad too). Does not touch the other field — unlike the original's
    /// `set_active_context`, there is no ambiguous "None means leave
    /// unchanged" convention here: use [`Self::clear_active_context`] to
    /// explicitly clear one or both fields.
    pub fn set_active_repo(&self, repo_id: &str, workpad_id: Option<&str>) -> Result<GlobalState> {
        let mut state = self.get_global_state()?;
        state.active_repo_id = Some(repo_id.to_string());
        if let Some(workpad_id) = workpad_id {
            state.active_workpad_id = Some(workpad_id.to_string());
        }
        self.backend.write_global_state(&state)?;
        Ok(state)
    }

    pub fn clear_active_context(&self, clear_repo: bool, clear_workpad: bool) -> Result<GlobalState> {
        let mut state = self.get_global_state()?;
        if clear_repo {
            state.active_repo_id = None;
        }
        if clear_workpad {
            state.active_workpad_id = None;
        }
        self.backend.write_global_state(&state)?;
        Ok(state)
    }

    /// Set both fields at once, `None` clearing the corresponding field —
    /// unlike [`Self::set_active_repo`], which leaves a `None` workpad
    /// untouched. Backs [`crate::git_state_sync::GitStateSync::set_active_context`].
    pub fn set_active_context(&self, repo_id: Option<&str>, workpad_id: Option<&str>) -> Result<GlobalState> {
        let mut state = self.get_global_state()?;
        state.active_repo_id = repo_id.map(str::to_string);
        state.active_workpad_id = workpad_id.map(str::to_string);
        self.backend.write_global_state(&state)?;
        Ok(state)
    }

    // ── Repositories ─────────────────────────────────────────────────

    pub fn create_repository(&self, repo: Repository) -> Result<Repository> {
        self.backend.write_repository(&repo)?;
        self.emit_event(EventType::RepoCreated, event_data([("repo_id", repo.id.clone())]))?;
        Ok(repo)
    }

    pub fn get_repository(&self, repo_id: &str) -> Result<Option<Repository>> {
        self.backend.read_repository(repo_id)
    }

    pub fn list_repositories(&self) -> Result<Vec<Repository>> {
        self.backend.list_repositories()
    }

    pub fn update_repository(&self, repo_id: &str, f: impl FnOnce(&mut Repository)) -> Result<Option<Repository>> {
        let Some(mut repo) = self.get_repository(repo_id)? else {
            return Ok(None);
        };
        f(&mut repo);
        self.backend.write_repository(&repo)?;
        self.emit_event(EventType::RepoUpdated, event_data([("repo_id", repo_id.to_string())]))?;
        Ok(Some(repo))
    }

    /// Delete a repository and everything that hangs off it: its workpads,
    /// and each workpad's test runs / AI operations / promotion records.
    pub fn delete_repository(&self, repo_id: &str) -> Result<()> {
        if self.get_repository(repo_id)?.is_none() {
            return Ok(());
        }

        for workpad in self.list_workpads(Some(repo_id))? {
            self.delete_workpad(&workpad.id)?;
        }
        for record in self.list_promotion_records(Some(repo_id), None, usize::MAX)? {
            self.backend.delete_promotion_record(&record.id)?;
        }
        self.backend.delete_repository(repo_id)
    }

    // ── Workpads ─────────────────────────────────────────────────────

    pub fn create_workpad(&self, workpad: Workpad) -> Result<Workpad> {
        self.backend.write_workpad(&workpad)?;
        if let Some(mut repo) = self.get_repository(&workpad.repo_id)? {
            repo.active_workpad_count += 1;
            self.backend.write_repository(&repo)?;
        }
        self.emit_event(
            EventType::WorkpadCreated,
            event_data([("workpad_id", workpad.id.clone()), ("repo_id", workpad.repo_id.clone())]),
        )?;
        Ok(workpad)
    }

    pub fn get_workpad(&self, workpad_id: &str) -> Result<Option<Workpad>> {
        self.backend.read_workpad(workpad_id)
    }

    pub fn list_workpads(&self, repo_id: Option<&str>) -> Result<Vec<Workpad>> {
        self.backend.list_workpads(repo_id)
    }

    pub fn update_workpad(&self, workpad_id: &str, f: impl FnOnce(&mut Workpad)) -> Result<Option<Workpad>> {
        let Some(mut pad) = self.get_workpad(workpad_id)? else {
            return Ok(None);
        };
        f(&mut pad);
        self.backend.write_workpad(&pad)?;
        self.emit_event(EventType::WorkpadUpdated, event_data([("workpad_id", workpad_id.to_string())]))?;
        Ok(Some(pad))
    }

    pub fn mark_promoted(&self, workpad_id: &str, commit_hash: &str) -> Result<Option<Workpad>> {
        let result = self.update_workpad(workpad_id, |pad| {
            pad.status = WorkpadStatus::Promoted;
            pad.current_commit = Some(commit_hash.to_string());
        })?;
        self.emit_event(
            EventType::WorkpadPromoted,
            event_data([("workpad_id", workpad_id.to_string()), ("commit_hash", commit_hash.to_string())]),
        )?;
        Ok(result)
    }

    /// Delete a workpad and everything scoped to it: test runs, AI
    /// operations, and promotion records. Decrements the owning repository's
    /// active workpad count if the workpad was still active.
    pub fn delete_workpad(&self, workpad_id: &str) -> Result<()> {
        let Some(workpad) = self.get_workpad(workpad_id)? else {
            return Ok(());
        };

        for run in self.list_test_runs(Some(workpad_id))? {
            self.backend.delete_test_run(&run.run_id)?;
        }
        for op in self.list_ai_operations(Some(workpad_id))? {
            self.backend.delete_ai_operation(&op.id)?;
        }
        for record in self.list_promotion_records(None, Some(workpad_id), usize::MAX)? {
            self.backend.delete_promotion_record(&record.id)?;
        }

        self.backend.delete_workpad(workpad_id)?;

        if workpad.status == WorkpadStatus::Active {
            if let Some(mut repo) = self.get_repository(&workpad.repo_id)? {
                repo.active_workpad_count = repo.active_workpad_count.saturating_sub(1);
                self.backend.write_repository(&repo)?;
            }
        }

        self.emit_event(EventType::WorkpadDeleted, event_data([("workpad_id", workpad_id.to_string())]))
    }

    // ── Test runs ────────────────────────────────────────────────────

    pub fn create_test_run(&self, workpad_id: Option<&str>, target: &str) -> Result<TestRun> {
        let run = TestRun::new(uuid::Uuid::new_v4().to_string(), workpad_id.map(str::to_string), target.to_string());
        self.backend.write_test_run(&run)?;

        if let Some(workpad_id) = workpad_id {
            self.update_workpad(workpad_id, |_| {})?;
        }

        self.emit_event(
            EventType::TestStarted,
            event_data_opt([("run_id", Some(run.run_id.clone())), ("workpad_id", workpad_id.map(str::to_string))]),
        )?;
        Ok(run)
    }

    /// Finalize a test run with its aggregate counts and full per-test
    /// records (§3's TestRun, §4.5 step 4).
    pub fn finalize_test_run(&self, run_id: &str, status: TestRunStatus, verdict: TestVerdict, tests: &[TestResult]) -> Result<Option<TestRun>> {
        let Some(mut run) = self.backend.read_test_run(run_id)? else {
            return Ok(None);
        };
        run.status = status;
        run.completed_at = Some(now());
        run.total_tests = tests.len() as u32;
        run.passed = tests.iter().filter(|t| t.status == TestStatus::Passed).count() as u32;
        run.failed = tests.iter().filter(|t| t.status == TestStatus::Failed).count() as u32;
        run.skipped = tests.iter().filter(|t| t.status == TestStatus::Skipped).count() as u32;
        run.duration_ms = tests.iter().map(|t| t.duration_ms).sum();
        run.tests = tests.to_vec();
        self.backend.write_test_run(&run)?;

        if let Some(workpad_id) = run.workpad_id.clone() {
            self.update_workpad(&workpad_id, |pad| pad.last_test_verdict = Some(verdict))?;
        }

        self.emit_event(
            EventType::TestCompleted,
            event_data_opt([("run_id", Some(run_id.to_string())), ("workpad_id", run.workpad_id.clone())]),
        )?;
        Ok(Some(run))
    }

    pub fn get_test_run(&self, run_id: &str) -> Result<Option<TestRun>> {
        self.backend.read_test_run(run_id)
    }

    pub fn list_test_runs(&self, workpad_id: Option<&str>) -> Result<Vec<TestRun>> {
        self.backend.list_test_runs(workpad_id)
    }

    // ── AI operations ────────────────────────────────────────────────

    pub fn create_ai_operation(&self, workpad_id: Option<&str>, operation_type: AIOperationType, model: &str, prompt: &str) -> Result<AIOperation> {
        let op = AIOperation {
            id: uuid::Uuid::new_v4().to_string(),
            workpad_id: workpad_id.map(str::to_string),
            operation_type,
            model: model.to_string(),
            status: AIOperationStatus::Pending,
            prompt: prompt.to_string(),
            response: None,
            tokens_used: 0,
            cost: 0.0,
            created_at: now(),
            completed_at: None,
            error: None,
        };
        self.backend.write_ai_operation(&op)?;
        self.emit_event(
            EventType::AiOperationStarted,
            event_data_opt([("operation_id", Some(op.id.clone())), ("workpad_id", workpad_id.map(str::to_string))]),
        )?;
        Ok(op)
    }

    pub fn update_ai_operation(&self, operation_id: &str, f: impl FnOnce(&mut AIOperation)) -> Result<Option<AIOperation>> {
        let Some(mut op) = self.backend.read_ai_operation(operation_id)? else {
            return Ok(None);
        };
        f(&mut op);
        self.backend.write_ai_operation(&op)?;

        if matches!(op.status, AIOperationStatus::Completed | AIOperationStatus::Failed) {
            self.emit_event(
                EventType::AiOperationCompleted,
                event_data_opt([("operation_id", Some(operation_id.to_string())), ("workpad_id", op.workpad_id.clone())]),
            )?;
        }
        Ok(Some(op))
    }

    pub fn list_ai_operations(&self, workpad_id: Option<&str>) -> Result<Vec<AIOperation>> {
        self.backend.list_ai_operations(workpad_id)
    }

    // ── Promotion records ────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn record_promotion_decision(
        &self,
        repo_id: &str,
        workpad_id: &str,
        decision: PromotionDecisionType,
        can_promote: bool,
        auto_promote_requested: bool,
        promoted: bool,
        commit_hash: Option<String>,
        message: &str,
        test_run_id: Option<String>,
        ci_status: Option<String>,
        ci_message: Option<String>,
    ) -> Result<PromotionRecord> {
        let record = PromotionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            repo_id: repo_id.to_string(),
            workpad_id: workpad_id.to_string(),
            decision,
            can_promote,
            auto_promote_requested,
            promoted,
            commit_hash: commit_hash.clone(),
            message: message.to_string(),
            test_run_id,
            ci_status,
            ci_message,
            created_at: now(),
        };
        self.backend.write_promotion_record(&record)?;
        self.emit_event(
            EventType::PromotionRecorded,
            event_data_opt([
                ("repo_id", Some(repo_id.to_string())),
                ("workpad_id", Some(workpad_id.to_string())),
                ("commit_hash", commit_hash),
            ]),
        )?;
        Ok(record)
    }

    pub fn list_promotion_records(&self, repo_id: Option<&str>, workpad_id: Option<&str>, limit: usize) -> Result<Vec<PromotionRecord>> {
        self.backend.list_promotion_records(repo_id, workpad_id, limit)
    }

    // ── Commits ──────────────────────────────────────────────────────

    pub fn add_commit(&self, repo_id: &str, commit: CommitNode) -> Result<()> {
        self.backend.write_commit(repo_id, &commit)?;
        self.emit_event(
            EventType::CommitCreated,
            event_data([("repo_id", repo_id.to_string()), ("sha", commit.sha.clone())]),
        )
    }

    pub fn get_commits(&self, repo_id: &str, limit: usize) -> Result<Vec<CommitNode>> {
        self.backend.read_commits(repo_id, limit)
    }

    // ── Events ───────────────────────────────────────────────────────

    pub fn get_events(&self, since: Option<chrono::DateTime<chrono::Utc>>, limit: usize) -> Result<Vec<StateEvent>> {
        self.backend.read_events(since, limit)
    }
}

fn event_data<const N: usize>(pairs: [(&str, String); N]) -> HashMap<String, serde_json::Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), serde_json::Value::String(v))).collect()
}

fn event_data_opt<const N: usize>(pairs: [(&str, Option<String>); N]) -> HashMap<String, serde_json::Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RepoSource;
    use crate::state::backend::JsonStateBackend;
    use tempfile::TempDir;

    fn manager() -> (StateManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(JsonStateBackend::new(dir.path()).unwrap());
        (StateManager::new(backend), dir)
    }

    fn repo(id: &str) -> Repository {
        Repository {
            id: id.to_string(),
            name: "demo".to_string(),
            path: "/tmp/demo".to_string(),
            trunk_branch: "main".to_string(),
            created_at: now(),
            source: RepoSource::Empty,
            active_workpad_count: 0,
        }
    }

    #[test]
    fn delete_repository_cascades_to_workpads_and_their_children() {
        let (mgr, _dir) = manager();
        mgr.create_repository(repo("r1")).unwrap();
        let pad = Workpad::new("p1".to_string(), "r1".to_string(), "t".to_string(), "pads/t-abc".to_string(), "deadbeef".to_string());
        mgr.create_workpad(pad).unwrap();
        mgr.create_test_run(Some("p1"), "all").unwrap();

        mgr.delete_repository("r1").unwrap();

        assert!(mgr.get_repository("r1").unwrap().is_none());
        assert!(mgr.get_workpad("p1").unwrap().is_none());
        assert!(mgr.list_test_runs(Some("p1")).unwrap().is_empty());
    }

    #[test]
    fn set_active_repo_leaves_workpad_untouched_when_not_given() {
        let (mgr, _dir) = manager();
        mgr.set_active_repo("r1", Some("p1")).unwrap();
        let state = mgr.set_active_repo("r2", None).unwrap();
        assert_eq!(state.active_repo_id.as_deref(), Some("r2"));
        assert_eq!(state.active_workpad_id.as_deref(), Some("p1"));
    }

    #[test]
    fn clear_active_context_clears_only_requested_fields() {
        let (mgr, _dir) = manager();
        mgr.set_active_repo("r1", Some("p1")).unwrap();
        let state = mgr.clear_active_context(false, true).unwrap();
        assert_eq!(state.active_repo_id.as_deref(), Some("r1"));
        assert!(state.active_workpad_id.is_none());
    }

    #[test]
    fn active_workpad_count_tracks_creation_and_deletion() {
        let (mgr, _dir) = manager();
        mgr.create_repository(repo("r1")).unwrap();
        let pad = Workpad::new("p1".to_string(), "r1".to_string(), "t".to_string(), "pads/t-abc".to_string(), "deadbeef".to_string());
        mgr.create_workpad(pad).unwrap();
        assert_eq!(mgr.get_repository("r1").unwrap().unwrap().active_workpad_count, 1);

        mgr.delete_workpad("p1").unwrap();
        assert_eq!(mgr.get_repository("r1").unwrap().unwrap().active_workpad_count, 0);
    }

    #[test]
    fn events_are_emitted_for_lifecycle_operations() {
        let (mgr, _dir) = manager();
        mgr.create_repository(repo("r1")).unwrap();
        let events = mgr.get_events(None, 10).unwrap();
        assert_eq!(events[0].event_type, EventType::RepoCreated);
    }
}
