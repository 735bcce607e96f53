//! Façade bridging [`GitEngine`] (actual git) and [`StateManager`] (the JSON
//! state journal) so every git mutation is reflected in state and vice versa
//! (§4.8). This is the entry point most callers outside the core should use.

use crate::error::SyncError;
use crate::git_engine::GitEngine;
use crate::model::{now, CommitNode, PromotionDecisionType, Repository, TestRunStatus, TestVerdict, Workpad, WorkpadStatus};
use crate::state::StateManager;

type Result<T> = std::result::Result<T, SyncError>;

pub struct RepoSummary {
    pub repo_id: String,
    pub name: String,
    pub path: String,
    pub trunk_branch: String,
}

pub struct WorkpadSummary {
    pub workpad_id: String,
    pub repo_id: String,
    pub title: String,
    pub branch_name: String,
    pub status: WorkpadStatus,
}

pub struct GitStateSync {
    git_engine: GitEngine,
    state_manager: StateManager,
}

impl GitStateSync {
    pub fn new(git_engine: GitEngine, state_manager: StateManager) -> Self {
        Self { git_engine, state_manager }
    }

    pub fn git_engine(&self) -> &GitEngine {
        &self.git_engine
    }

    pub fn state_manager(&self) -> &StateManager {
        &self.state_manager
    }

    // ── Repository operations ───────────────────────────────────────

    pub fn init_repo_from_zip(&self, bytes: &[u8], name: &str) -> Result<RepoSummary> {
        let repo_id = self.git_engine.init_from_zip(bytes, name)?;
        self.finish_repo_init(repo_id)
    }

    pub fn init_repo_from_git(&self, url: &str, name: Option<&str>) -> Result<RepoSummary> {
        let repo_id = self.git_engine.init_from_git(url, name)?;
        self.finish_repo_init(repo_id)
    }

    pub fn create_empty_repo(&self, name: &str) -> Result<RepoSummary> {
        let repo_id = self.git_engine.create_empty_repo(name, None)?;
        self.finish_repo_init(repo_id)
    }

    fn finish_repo_init(&self, repo_id: String) -> Result<RepoSummary> {
        let info = self
            .git_engine
            .get_repo(&repo_id)
            .expect("repo was just created by the git engine");

        self.state_manager.create_repository(Repository {
            id: info.id.clone(),
            name: info.name.clone(),
            path: info.path.display().to_string(),
            trunk_branch: info.trunk_branch.clone(),
            created_at: info.created_at,
            source: to_model_source(info.source),
            active_workpad_count: 0,
        })?;

        self.state_manager.set_active_repo(&repo_id, None)?;
        self.sync_commits(&repo_id, 100)?;

        Ok(RepoSummary {
            repo_id: info.id,
            name: info.name,
            path: info.path.display().to_string(),
            trunk_branch: info.trunk_branch,
        })
    }

    pub fn delete_repository(&self, repo_id: &str, remove_files: bool) -> Result<()> {
        if self.git_engine.get_repo(repo_id).is_none() {
            return Err(SyncError::Git(crate::error::GitEngineError::RepoNotFound(repo_id.to_string())));
        }
        self.git_engine.delete_repository(repo_id, remove_files)?;
        self.state_manager.delete_repository(repo_id)?;

        let ctx = self.state_manager.get_global_state()?;
        let repo_is_active = ctx.active_repo_id.as_deref() == Some(repo_id);
        let workpad_orphaned = ctx
            .active_workpad_id
            .as_deref()
            .map(|pad_id| self.state_manager.get_workpad(pad_id).ok().flatten().is_none())
            .unwrap_or(false);

        if repo_is_active || workpad_orphaned {
            self.state_manager.clear_active_context(true, true)?;
        }
        Ok(())
    }

    // ── Workpad operations ───────────────────────────────────────────

    pub fn create_workpad(&self, repo_id: &str, title: &str) -> Result<WorkpadSummary> {
        let pad_id = self.git_engine.create_workpad(repo_id, title)?;
        let info = self.git_engine.get_workpad(&pad_id).expect("workpad was just created");

        self.state_manager.create_workpad(Workpad::new(
            info.id.clone(),
            info.repo_id.clone(),
            info.title.clone(),
            info.branch_name.clone(),
            info.base_commit.clone(),
        ))?;
        self.state_manager.set_active_repo(repo_id, Some(&pad_id))?;

        Ok(WorkpadSummary {
            workpad_id: info.id,
            repo_id: info.repo_id,
            title: info.title,
            branch_name: info.branch_name,
            status: WorkpadStatus::Active,
        })
    }

    pub fn apply_patch(&self, pad_id: &str, patch: &str, message: Option<&str>) -> Result<String> {
        let commit_hash = self.git_engine.apply_patch(pad_id, patch, message)?;

        self.state_manager.update_workpad(pad_id, |pad| {
            pad.current_commit = Some(commit_hash.clone());
            pad.updated_at = now();
        })?;

        if let Some(pad) = self.git_engine.get_workpad(pad_id) {
            self.sync_commits(&pad.repo_id, 100)?;
        }

        Ok(commit_hash)
    }

    pub fn promote_workpad(&self, pad_id: &str) -> Result<String> {
        if !self.git_engine.can_promote(pad_id)? {
            return Err(SyncError::Git(crate::error::GitEngineError::CannotPromote { pad_id: pad_id.to_string() }));
        }

        let merge_commit = self.git_engine.promote_workpad(pad_id)?;
        self.state_manager.mark_promoted(pad_id, &merge_commit)?;

        if let Some(pad) = self.git_engine.get_workpad(pad_id) {
            self.sync_commits(&pad.repo_id, 100)?;
        }

        Ok(merge_commit)
    }

    /// Soft-delete: the Git branch is removed, but the workpad's state record
    /// is kept (marked `Deleted`) along with its test runs and AI operations,
    /// unlike [`crate::state::StateManager::delete_workpad`]'s hard purge.
    pub fn delete_workpad(&self, pad_id: &str, force: bool) -> Result<()> {
        let was_active = self
            .state_manager
            .get_workpad(pad_id)?
            .map(|pad| pad.status == WorkpadStatus::Active)
            .unwrap_or(false);

        self.git_engine.delete_workpad(pad_id, force)?;
        let pad = self.state_manager.update_workpad(pad_id, |pad| {
            pad.status = WorkpadStatus::Deleted;
            pad.updated_at = now();
        })?;

        if was_active {
            if let Some(pad) = pad {
                self.state_manager.update_repository(&pad.repo_id, |repo| {
                    repo.active_workpad_count = repo.active_workpad_count.saturating_sub(1);
                })?;
            }
        }
        Ok(())
    }

    pub fn revert_last_commit(&self, repo_id: &str) -> Result<String> {
        let sha = self.git_engine.revert_last_commit(repo_id)?;
        self.sync_commits(repo_id, 100)?;
        Ok(sha)
    }

    pub fn get_diff(&self, pad_id: &str, base: &str) -> Result<String> {
        Ok(self.git_engine.get_diff(pad_id, base)?)
    }

    pub fn get_status(&self, repo_id: &str, pad_id: Option<&str>) -> Result<crate::git_engine::WorkingTreeStatus> {
        Ok(self.git_engine.get_status(repo_id, pad_id)?)
    }

    pub fn get_history(&self, repo_id: &str, limit: usize, branch: Option<&str>) -> Result<Vec<crate::git_engine::CommitRecord>> {
        Ok(self.git_engine.get_history(repo_id, limit, branch)?)
    }

    // ── Read-throughs (§4.8) ──────────────────────────────────────────
    //
    // Trivial one-line delegations so external callers never need the
    // `git_engine()`/`state_manager()` escape hatches for plain reads.

    pub fn get_repo(&self, repo_id: &str) -> Option<crate::git_engine::RepoInfo> {
        self.git_engine.get_repo(repo_id)
    }

    pub fn list_repos(&self) -> Vec<crate::git_engine::RepoInfo> {
        self.git_engine.list_repos()
    }

    pub fn get_workpad(&self, pad_id: &str) -> Option<crate::git_engine::WorkpadInfo> {
        self.git_engine.get_workpad(pad_id)
    }

    pub fn list_workpads(&self, repo_id: &str) -> Vec<crate::git_engine::WorkpadInfo> {
        self.git_engine.list_workpads(repo_id)
    }

    pub fn get_test_runs(&self, workpad_id: Option<&str>) -> Result<Vec<crate::model::TestRun>> {
        Ok(self.state_manager.list_test_runs(workpad_id)?)
    }

    pub fn list_ai_operations(&self, workpad_id: Option<&str>) -> Result<Vec<crate::model::AIOperation>> {
        Ok(self.state_manager.list_ai_operations(workpad_id)?)
    }

    pub fn get_active_context(&self) -> Result<crate::model::GlobalState> {
        Ok(self.state_manager.get_global_state()?)
    }

    pub fn set_active_context(&self, repo_id: Option<&str>, workpad_id: Option<&str>) -> Result<crate::model::GlobalState> {
        Ok(self.state_manager.set_active_context(repo_id, workpad_id)?)
    }

    // ── Test run bookkeeping ─────────────────────────────────────────

    pub fn record_test_completion(
        &self,
        run_id: &str,
        status: TestRunStatus,
        verdict: TestVerdict,
        results: &[crate::test_orchestrator::TestResult],
    ) -> Result<()> {
        let tests: Vec<crate::model::TestResult> = results.iter().map(to_model_test_result).collect();
        self.state_manager.finalize_test_run(run_id, status, verdict, &tests)?;
        Ok(())
    }

    pub fn record_promotion(
        &self,
        repo_id: &str,
        workpad_id: &str,
        decision: PromotionDecisionType,
        can_promote: bool,
        auto_promote_requested: bool,
        promoted: bool,
        commit_hash: Option<String>,
        message: &str,
    ) -> Result<()> {
        self.state_manager.record_promotion_decision(
            repo_id,
            workpad_id,
            decision,
            can_promote,
            auto_promote_requested,
            promoted,
            commit_hash,
            message,
            None,
            None,
            None,
        )?;
        Ok(())
    }

    // ── State synchronization ───────────────────────────────────────

    /// Mirror the git history into the commit ring buffer. Deduplicates by
    /// SHA before prepending — unlike the original, which always prepends
    /// and can therefore grow the log with duplicate entries every time the
    /// same trunk tip is synced twice.
    fn sync_commits(&self, repo_id: &str, limit: usize) -> Result<()> {
        let history = self.git_engine.get_history(repo_id, limit, None)?;
        let already_synced = self.state_manager.get_commits(repo_id, limit)?;
        let seen: std::collections::HashSet<&str> = already_synced.iter().map(|c| c.sha.as_str()).collect();

        // walk oldest-first so the ring buffer ends up with the newest
        // commit at the front, matching the engine's ordering.
        for commit in history.iter().rev() {
            if seen.contains(commit.sha.as_str()) {
                continue;
            }
            self.state_manager.add_commit(
                repo_id,
                CommitNode {
                    sha: commit.sha.clone(),
                    short_sha: commit.short_sha.clone(),
                    message: commit.message.clone(),
                    author: commit.author.clone(),
                    timestamp: commit.date,
                    parent_sha: commit.parents.first().cloned(),
                    workpad_id: None,
                    test_verdict: None,
                    ci_status: None,
                    is_trunk: true,
                },
            )?;
        }
        Ok(())
    }

    pub fn sync_all(&self) -> Result<SyncStats> {
        let mut stats = SyncStats::default();

        for repo in self.git_engine.list_repos() {
            if self.state_manager.get_repository(&repo.id)?.is_none() {
                self.state_manager.create_repository(Repository {
                    id: repo.id.clone(),
                    name: repo.name.clone(),
                    path: repo.path.display().to_string(),
                    trunk_branch: repo.trunk_branch.clone(),
                    created_at: repo.created_at,
                    source: to_model_source(repo.source),
                    active_workpad_count: 0,
                })?;
                stats.repos += 1;
            }

            self.sync_commits(&repo.id, 100)?;
            stats.commits += self.state_manager.get_commits(&repo.id, 100)?.len();

            for pad in self.git_engine.list_workpads(&repo.id) {
                if self.state_manager.get_workpad(&pad.id)?.is_none() {
                    self.state_manager.create_workpad(Workpad::new(
                        pad.id.clone(),
                        pad.repo_id.clone(),
                        pad.title.clone(),
                        pad.branch_name.clone(),
                        pad.base_commit.clone(),
                    ))?;
                    stats.workpads += 1;
                }
            }
        }

        Ok(stats)
    }
}

#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    pub repos: usize,
    pub workpads: usize,
    pub commits: usize,
}

fn to_model_source(source: crate::git_engine::RepoSource) -> crate::model::RepoSource {
    match source {
        crate::git_engine::RepoSource::Zip => crate::model::RepoSource::Zip,
        crate::git_engine::RepoSource::Git => crate::model::RepoSource::Git,
        crate::git_engine::RepoSource::Empty => crate::model::RepoSource::Empty,
    }
}

/// The engine-layer `TestResult` has no `test_id` of its own; one is minted
/// here, at the point it's first persisted.
fn to_model_test_result(result: &crate::test_orchestrator::TestResult) -> crate::model::TestResult {
    crate::model::TestResult {
        test_id: uuid::Uuid::new_v4().to_string(),
        name: result.name.clone(),
        status: to_model_test_status(result.status),
        duration_ms: result.duration_ms,
        exit_code: Some(result.exit_code),
        stdout: result.stdout.clone(),
        stderr: result.stderr.clone(),
        error: result.error.clone(),
        log_path: result.log_path.clone(),
        metrics: result.metrics.clone(),
        mode: Some(result.mode),
    }
}

fn to_model_test_status(status: crate::test_orchestrator::TestStatus) -> crate::model::TestStatus {
    use crate::test_orchestrator::TestStatus as Engine;
    use crate::model::TestStatus as State;
    match status {
        Engine::Passed => State::Passed,
        Engine::Failed => State::Failed,
        Engine::Timeout => State::Timeout,
        Engine::Error => State::Error,
        Engine::Skipped => State::Skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JsonStateBackend;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sync() -> (GitStateSync, TempDir, TempDir) {
        let git_dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        let git_engine = GitEngine::new(git_dir.path()).unwrap();
        let backend = Arc::new(JsonStateBackend::new(state_dir.path()).unwrap());
        let state_manager = StateManager::new(backend);
        (GitStateSync::new(git_engine, state_manager), git_dir, state_dir)
    }

    #[test]
    fn create_empty_repo_syncs_state_and_sets_active() {
        let (sync, _g, _s) = sync();
        let repo = sync.create_empty_repo("demo").unwrap();
        let state_repo = sync.state_manager().get_repository(&repo.repo_id).unwrap().unwrap();
        assert_eq!(state_repo.name, "demo");

        let global = sync.state_manager().get_global_state().unwrap();
        assert_eq!(global.active_repo_id.as_deref(), Some(repo.repo_id.as_str()));
    }

    #[test]
    fn create_workpad_sets_active_workpad_without_clearing_repo() {
        let (sync, _g, _s) = sync();
        let repo = sync.create_empty_repo("demo").unwrap();
        let pad = sync.create_workpad(&repo.repo_id, "feature").unwrap();

        let global = sync.state_manager().get_global_state().unwrap();
        assert_eq!(global.active_repo_id.as_deref(), Some(repo.repo_id.as_str()));
        assert_eq!(global.active_workpad_id.as_deref(), Some(pad.workpad_id.as_str()));
    }

    #[test]
    fn apply_patch_and_promote_updates_state_commit() {
        let (sync, _g, _s) = sync();
        let repo = sync.create_empty_repo("demo").unwrap();
        let pad = sync.create_workpad(&repo.repo_id, "feature").unwrap();

        let patch = "--- /dev/null\n+++ b/a.txt\n@@ -0,0 +1 @@\n+hi\n";
        let commit = sync.apply_patch(&pad.workpad_id, patch, None).unwrap();

        let state_pad = sync.state_manager().get_workpad(&pad.workpad_id).unwrap().unwrap();
        assert_eq!(state_pad.current_commit.as_deref(), Some(commit.as_str()));

        sync.promote_workpad(&pad.workpad_id).unwrap();
        let state_pad = sync.state_manager().get_workpad(&pad.workpad_id).unwrap().unwrap();
        assert_eq!(state_pad.status, WorkpadStatus::Promoted);
    }

    #[test]
    fn sync_commits_is_idempotent_across_repeated_calls() {
        let (sync, _g, _s) = sync();
        let repo = sync.create_empty_repo("demo").unwrap();
        let pad = sync.create_workpad(&repo.repo_id, "feature").unwrap();
        let patch = "--- /dev/null\n+++ b/a.txt\n@@ -0,0 +1 @@\n+hi\n";
        sync.apply_patch(&pad.workpad_id, patch, None).unwrap();
        sync.promote_workpad(&pad.workpad_id).unwrap();

        // sync_all runs the same sync_commits path again; no duplicates should appear.
        sync.sync_all().unwrap();
        sync.sync_all().unwrap();

        let commits = sync.state_manager().get_commits(&repo.repo_id, 100).unwrap();
        let mut shas: Vec<&str> = commits.iter().map(|c| c.sha.as_str()).collect();
        let before = shas.len();
        shas.sort();
        shas.dedup();
        assert_eq!(shas.len(), before);
    }

    #[test]
    fn delete_repository_clears_active_context_when_it_was_active() {
        let (sync, _g, _s) = sync();
        let repo = sync.create_empty_repo("demo").unwrap();
        sync.delete_repository(&repo.repo_id, true).unwrap();

        let global = sync.state_manager().get_global_state().unwrap();
        assert!(global.active_repo_id.is_none());
    }
}
