//! Automatic rollback of a promoted commit that failed its post-merge smoke
//! tests, plus a small `CIMonitor` dispatcher that decides whether to invoke
//! it at all (§4.6).

use crate::ci_orchestrator::CiResult;
use crate::git_engine::GitEngine;

#[derive(Debug, Clone)]
pub struct RollbackResult {
    pub success: bool,
    pub repo_id: String,
    pub reverted_commit: String,
    pub new_pad_id: Option<String>,
    pub message: String,
}

pub struct RollbackHandler<'a> {
    git_engine: &'a GitEngine,
}

impl<'a> RollbackHandler<'a> {
    pub fn new(git_engine: &'a GitEngine) -> Self {
        Self { git_engine }
    }

    /// Revert trunk's tip commit and, unless told otherwise, open a fresh
    /// workpad named after the reverted commit so the next fix starts clean.
    /// The revert itself is never skipped if `ci_result.is_red()`; only the
    /// workpad recreation is best-effort.
    pub fn handle_failed_ci(&self, ci_result: &CiResult, recreate_workpad: bool) -> RollbackResult {
        let repo_id = ci_result.repo_id.clone();
        let commit_hash = ci_result.commit_hash.clone();

        if !ci_result.is_red() {
            return RollbackResult {
                success: true,
                repo_id,
                reverted_commit: commit_hash,
                new_pad_id: None,
                message: "CI passed - no rollback needed".to_string(),
            };
        }

        if let Err(e) = self.git_engine.revert_last_commit(&repo_id) {
            return RollbackResult {
                success: false,
                repo_id,
                reverted_commit: commit_hash,
                new_pad_id: None,
                message: format!("rollback failed: {e}"),
            };
        }

        let mut new_pad_id = None;
        if recreate_workpad {
            let short = &commit_hash[..commit_hash.len().min(7)];
            match self.git_engine.create_workpad(&repo_id, &format!("fix-ci-{short}")) {
                Ok(id) => new_pad_id = Some(id),
                Err(_) => {
                    // rollback itself already succeeded; a failed follow-up
                    // workpad is not fatal, the developer can create one by hand.
                }
            }
        }

        let mut message = format!("Rolled back commit {} due to failed CI smoke tests.", &commit_hash[..commit_hash.len().min(8)]);
        if let Some(pad_id) = &new_pad_id {
            message.push_str(&format!(" Created workpad {pad_id} for fixes."));
        }

        RollbackResult { success: true, repo_id, reverted_commit: commit_hash, new_pad_id, message }
    }
}

/// Thin dispatcher: decides *whether* to call [`RollbackHandler`] based on
/// `auto_rollback`, without owning any policy of its own.
pub struct CiMonitor<'a> {
    rollback_handler: RollbackHandler<'a>,
}

impl<'a> CiMonitor<'a> {
    pub fn new(rollback_handler: RollbackHandler<'a>) -> Self {
        Self { rollback_handler }
    }

    pub fn monitor_and_rollback(&self, ci_result: &CiResult, auto_rollback: bool) -> Option<RollbackResult> {
        if !ci_result.is_red() {
            return None;
        }
        if !auto_rollback {
            return None;
        }
        Some(self.rollback_handler.handle_failed_ci(ci_result, true))
    }
}
