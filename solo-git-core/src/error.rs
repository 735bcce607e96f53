//! Typed error taxonomy for the Solo Git engines.
//!
//! Each engine raises its own closed error enum; workflow-layer code (the
//! auto-merge workflow, CI orchestrator, rollback handler) catches these,
//! folds them into a result object, and never lets them escape to the
//! caller as a panic or a bare `anyhow::Error` string.

use thiserror::Error;

/// Errors raised by [`crate::git_engine::GitEngine`].
#[derive(Debug, Error)]
pub enum GitEngineError {
    #[error("repository not found: {0}")]
    RepoNotFound(String),

    #[error("workpad not found: {0}")]
    WorkpadNotFound(String),

    #[error("patch did not apply cleanly: {0}")]
    PatchApplyFailed(String),

    #[error("cannot promote workpad {pad_id}: trunk has diverged")]
    CannotPromote { pad_id: String },

    #[error("git command failed: {0}")]
    CommandFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by [`crate::test_orchestrator::TestOrchestrator`].
#[derive(Debug, Error)]
pub enum TestOrchestratorError {
    #[error("test dependency graph has a cycle involving '{0}'")]
    DependencyCycle(String),

    #[error("test '{test}' depends on unknown test '{dependency}'")]
    UnknownDependency { test: String, dependency: String },

    #[error("docker execution mode was requested but docker is unavailable")]
    DockerUnavailable,

    #[error("deadlock detected: tests remain with no running or ready test")]
    Deadlock,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the state backend / manager (§4.7).
///
/// State errors are logged by callers and are never allowed to leave a
/// partially-written Git mutation unreported; see [`crate::git_state_sync`].
#[derive(Debug, Error)]
pub enum StateError {
    #[error("record not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error for [`crate::git_state_sync::GitStateSync`], the only
/// component that can fail on either side (Git or state) of a single call.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Git(#[from] GitEngineError),

    #[error(transparent)]
    State(#[from] StateError),
}
