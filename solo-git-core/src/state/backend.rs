//! Pluggable persistence for Solo Git state (§4.7).
//!
//! [`StateBackend`] is the seam: the JSON file tree below is the reference
//! implementation, but nothing above this trait assumes files on disk — a
//! SQLite or REST-backed implementation can be dropped in without touching
//! [`super::manager::StateManager`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::error::StateError;
use crate::model::{AIOperation, CommitNode, GlobalState, PromotionRecord, Repository, StateEvent, TestRun, Workpad};

type Result<T> = std::result::Result<T, StateError>;

pub trait StateBackend: Send + Sync {
    fn read_global_state(&self) -> Result<GlobalState>;
    fn write_global_state(&self, state: &GlobalState) -> Result<()>;

    fn read_repository(&self, repo_id: &str) -> Result<Option<Repository>>;
    fn write_repository(&self, state: &Repository) -> Result<()>;
    fn list_repositories(&self) -> Result<Vec<Repository>>;
    fn delete_repository(&self, repo_id: &str) -> Result<()>;

    fn read_workpad(&self, workpad_id: &str) -> Result<Option<Workpad>>;
    fn write_workpad(&self, state: &Workpad) -> Result<()>;
    fn list_workpads(&self, repo_id: Option<&str>) -> Result<Vec<Workpad>>;
    fn delete_workpad(&self, workpad_id: &str) -> Result<()>;

    fn read_test_run(&self, run_id: &str) -> Result<Option<TestRun>>;
    fn write_test_run(&self, run: &TestRun) -> Result<()>;
    fn list_test_runs(&self, workpad_id: Option<&str>) -> Result<Vec<TestRun>>;
    fn delete_test_run(&self, run_id: &str) -> Result<()>;

    fn read_ai_operation(&self, operation_id: &str) -> Result<Option<AIOperation>>;
    fn write_ai_operation(&self, operation: &AIOperation) -> Result<()>;
    fn list_ai_operations(&self, workpad_id: Option<&str>) -> Result<Vec<AIOperation>>;
    fn delete_ai_operation(&self, operation_id: &str) -> Result<()>;

    fn write_promotion_record(&self, record: &PromotionRecord) -> Result<()>;
    fn list_promotion_records(&self, repo_id: Option<&str>, workpad_id: Option<&str>, limit: usize) -> Result<Vec<PromotionRecord>>;
    fn delete_promotion_record(&self, record_id: &str) -> Result<()>;

    fn read_commits(&self, repo_id: &str, limit: usize) -> Result<Vec<CommitNode>>;
    fn write_commit(&self, repo_id: &str, commit: &CommitNode) -> Result<()>;

    fn write_event(&self, event: &StateEvent) -> Result<()>;
    fn read_events(&self, since: Option<chrono::DateTime<Utc>>, limit: usize) -> Result<Vec<StateEvent>>;
}

/// Temp-file-then-rename write, relying on POSIX rename being atomic within
/// a filesystem so a reader never observes a partially-written file.
fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

const MAX_COMMITS_PER_REPO: usize = 1000;
const MAX_EVENTS_PER_DAY: usize = 10_000;

/// On-disk layout under `state_dir`, one subdirectory per record kind plus
/// a day-bucketed `events/` journal (§6).
pub struct JsonStateBackend {
    state_dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonStateBackend {
    pub fn new(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into();
        for sub in ["repositories", "workpads", "test_runs", "ai_operations", "commits", "events", "promotions"] {
            fs::create_dir_all(state_dir.join(sub))?;
        }
        Ok(Self { state_dir, lock: Mutex::new(()) })
    }

    fn global_path(&self) -> PathBuf {
        self.state_dir.join("global.json")
    }

    fn repo_path(&self, repo_id: &str) -> PathBuf {
        self.state_dir.join("repositories").join(format!("{repo_id}.json"))
    }

    fn workpad_path(&self, workpad_id: &str) -> PathBuf {
        self.state_dir.join("workpads").join(format!("{workpad_id}.json"))
    }

    fn test_run_path(&self, run_id: &str) -> PathBuf {
        self.state_dir.join("test_runs").join(format!("{run_id}.json"))
    }

    fn ai_operation_path(&self, operation_id: &str) -> PathBuf {
        self.state_dir.join("ai_operations").join(format!("{operation_id}.json"))
    }

    fn promotion_path(&self, record_id: &str) -> PathBuf {
        self.state_dir.join("promotions").join(format!("{record_id}.json"))
    }

    fn commits_path(&self, repo_id: &str) -> PathBuf {
        self.state_dir.join("commits").join(format!("{repo_id}.json"))
    }

    fn events_path_for_today(&self) -> PathBuf {
        let date_str = Utc::now().format("%Y-%m-%d").to_string();
        self.state_dir.join("events").join(format!("events-{date_str}.json"))
    }

    fn remove_if_exists(&self, path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn list_dir<T: serde::de::DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let dir = self.state_dir.join(dir);
        if !dir.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(entry.path())?;
            out.push(serde_json::from_str(&content)?);
        }
        Ok(out)
    }
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct CommitLog {
    commits: Vec<CommitNode>,
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct EventLog {
    events: Vec<StateEvent>,
}

impl StateBackend for JsonStateBackend {
    fn read_global_state(&self) -> Result<GlobalState> {
        Ok(read_json(&self.global_path())?.unwrap_or_default())
    }

    fn write_global_state(&self, state: &GlobalState) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut state = state.clone();
        state.last_updated = Utc::now();
        atomic_write_json(&self.global_path(), &state)
    }

    fn read_repository(&self, repo_id: &str) -> Result<Option<Repository>> {
        read_json(&self.repo_path(repo_id))
    }

    fn write_repository(&self, state: &Repository) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        atomic_write_json(&self.repo_path(&state.id), state)
    }

    fn list_repositories(&self) -> Result<Vec<Repository>> {
        let mut repos: Vec<Repository> = self.list_dir("repositories")?;
        repos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(repos)
    }

    fn delete_repository(&self, repo_id: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        self.remove_if_exists(&self.repo_path(repo_id))
    }

    fn read_workpad(&self, workpad_id: &str) -> Result<Option<Workpad>> {
        read_json(&self.workpad_path(workpad_id))
    }

    fn write_workpad(&self, state: &Workpad) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut state = state.clone();
        state.updated_at = Utc::now();
        atomic_write_json(&self.workpad_path(&state.id), &state)
    }

    fn list_workpads(&self, repo_id: Option<&str>) -> Result<Vec<Workpad>> {
        let mut pads: Vec<Workpad> = self.list_dir("workpads")?;
        if let Some(repo_id) = repo_id {
            pads.retain(|p| p.repo_id == repo_id);
        }
        pads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pads)
    }

    fn delete_workpad(&self, workpad_id: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        self.remove_if_exists(&self.workpad_path(workpad_id))
    }

    fn read_test_run(&self, run_id: &str) -> Result<Option<TestRun>> {
        read_json(&self.test_run_path(run_id))
    }

    fn write_test_run(&self, run: &TestRun) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        atomic_write_json(&self.test_run_path(&run.run_id), run)
    }

    fn list_test_runs(&self, workpad_id: Option<&str>) -> Result<Vec<TestRun>> {
        let mut runs: Vec<TestRun> = self.list_dir("test_runs")?;
        if let Some(workpad_id) = workpad_id {
            runs.retain(|r| r.workpad_id.as_deref() == Some(workpad_id));
        }
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    fn delete_test_run(&self, run_id: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        self.remove_if_exists(&self.test_run_path(run_id))
    }

    fn read_ai_operation(&self, operation_id: &str) -> Result<Option<AIOperation>> {
        read_json(&self.ai_operation_path(operation_id))
    }

    fn write_ai_operation(&self, operation: &AIOperation) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        atomic_write_json(&self.ai_operation_path(&operation.id), operation)
    }

    fn list_ai_operations(&self, workpad_id: Option<&str>) -> Result<Vec<AIOperation>> {
        let mut ops: Vec<AIOperation> = self.list_dir("ai_operations")?;
        if let Some(workpad_id) = workpad_id {
            ops.retain(|o| o.workpad_id.as_deref() == Some(workpad_id));
        }
        ops.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(ops)
    }

    fn delete_ai_operation(&self, operation_id: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        self.remove_if_exists(&self.ai_operation_path(operation_id))
    }

    fn write_promotion_record(&self, record: &PromotionRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        atomic_write_json(&self.promotion_path(&record.id), record)
    }

    fn list_promotion_records(&self, repo_id: Option<&str>, workpad_id: Option<&str>, limit: usize) -> Result<Vec<PromotionRecord>> {
        let mut records: Vec<PromotionRecord> = self.list_dir("promotions")?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.retain(|r| repo_id.map_or(true, |id| r.repo_id == id) && workpad_id.map_or(true, |id| r.workpad_id == id));
        records.truncate(limit);
        Ok(records)
    }

    fn delete_promotion_record(&self, record_id: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        self.remove_if_exists(&self.promotion_path(record_id))
    }

    fn read_commits(&self, repo_id: &str, limit: usize) -> Result<Vec<CommitNode>> {
        let path = self.commits_path(repo_id);
        let log: CommitLog = read_json(&path)?.unwrap_or_default();
        Ok(log.commits.into_iter().take(limit).collect())
    }

    fn write_commit(&self, repo_id: &str, commit: &CommitNode) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let path = self.commits_path(repo_id);
        let mut log: CommitLog = read_json(&path)?.unwrap_or_default();
        log.commits.insert(0, commit.clone());
        log.commits.truncate(MAX_COMMITS_PER_REPO);
        atomic_write_json(&path, &log)
    }

    fn write_event(&self, event: &StateEvent) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let path = self.events_path_for_today();
        let mut log: EventLog = read_json(&path)?.unwrap_or_default();
        log.events.push(event.clone());
        if log.events.len() > MAX_EVENTS_PER_DAY {
            let excess = log.events.len() - MAX_EVENTS_PER_DAY;
            log.events.drain(0..excess);
        }
        atomic_write_json(&path, &log)
    }

    fn read_events(&self, since: Option<chrono::DateTime<Utc>>, limit: usize) -> Result<Vec<StateEvent>> {
        let path = self.events_path_for_today();
        let log: EventLog = read_json(&path)?.unwrap_or_default();
        let mut events: Vec<StateEvent> = log
            .events
            .into_iter()
            .rev()
            .filter(|e| since.map_or(true, |s| e.timestamp > s))
            .collect();
        events.truncate(limit);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{now, RepoSource, WorkpadStatus};
    use tempfile::TempDir;

    fn backend() -> (JsonStateBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        (JsonStateBackend::new(dir.path()).unwrap(), dir)
    }

    #[test]
    fn repository_round_trips() {
        let (backend, _dir) = backend();
        let repo = Repository {
            id: "r1".to_string(),
            name: "demo".to_string(),
            path: "/tmp/demo".to_string(),
            trunk_branch: "main".to_string(),
            created_at: now(),
            source: RepoSource::Empty,
            active_workpad_count: 0,
        };
        backend.write_repository(&repo).unwrap();
        let fetched = backend.read_repository("r1").unwrap().unwrap();
        assert_eq!(fetched.name, "demo");
        assert_eq!(backend.list_repositories().unwrap().len(), 1);

        backend.delete_repository("r1").unwrap();
        assert!(backend.read_repository("r1").unwrap().is_none());
    }

    #[test]
    fn commit_log_is_bounded_and_most_recent_first() {
        let (backend, _dir) = backend();
        for i in 0..5 {
            let commit = CommitNode {
                sha: format!("sha{i}"),
                short_sha: format!("s{i}"),
                message: "msg".to_string(),
                author: "solo".to_string(),
                timestamp: now(),
                parent_sha: None,
                workpad_id: None,
                test_verdict: None,
                ci_status: None,
                is_trunk: true,
            };
            backend.write_commit("r1", &commit).unwrap();
        }
        let commits = backend.read_commits("r1", 100).unwrap();
        assert_eq!(commits.len(), 5);
        assert_eq!(commits[0].sha, "sha4");
    }

    #[test]
    fn events_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        let backend = JsonStateBackend::new(dir.path()).unwrap();
        let event = StateEvent {
            id: "e1".to_string(),
            event_type: crate::model::EventType::RepoCreated,
            timestamp: now(),
            data: Default::default(),
        };
        backend.write_event(&event).unwrap();

        let reopened = JsonStateBackend::new(dir.path()).unwrap();
        let events = reopened.read_events(None, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "e1");
    }

    #[test]
    fn workpad_list_filters_by_repo() {
        let (backend, _dir) = backend();
        let mut pad = Workpad::new("p1".to_string(), "r1".to_string(), "t".to_string(), "pads/t-abc".to_string(), "deadbeef".to_string());
        pad.status = WorkpadStatus::Active;
        backend.write_workpad(&pad).unwrap();

        let mut other = pad.clone();
        other.id = "p2".to_string();
        other.repo_id = "r2".to_string();
        backend.write_workpad(&other).unwrap();

        assert_eq!(backend.list_workpads(Some("r1")).unwrap().len(), 1);
        assert_eq!(backend.list_workpads(None).unwrap().len(), 2);
    }
}
