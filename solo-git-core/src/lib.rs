//! Core engines for Solo Git: ephemeral workpads, test-driven auto-merge
//! onto a single trunk, and the state journal that tracks it all.
//!
//! [`git_state_sync::GitStateSync`] is the façade most callers should use —
//! it keeps [`git_engine::GitEngine`] (actual Git) and
//! [`state::StateManager`] (the JSON event journal) in lockstep.
//! [`auto_merge::AutoMergeWorkflow`] layers test execution, the promotion
//! gate, and post-merge CI/rollback on top of it.

pub mod auto_merge;
pub mod ci_orchestrator;
pub mod config;
pub mod error;
pub mod git_engine;
pub mod git_state_sync;
pub mod model;
pub mod naming;
pub mod promotion_gate;
pub mod rollback_handler;
pub mod state;
pub mod test_analyzer;
pub mod test_orchestrator;

pub use auto_merge::{AutoMergeResult, AutoMergeWorkflow};
pub use config::Config;
pub use git_engine::GitEngine;
pub use git_state_sync::GitStateSync;
pub use state::{StateBackend, StateManager};
