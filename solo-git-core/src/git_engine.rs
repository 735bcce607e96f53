//! Git engine — owns on-disk working trees and exposes repository/workpad
//! lifecycle as durable operations over a real Git object store (§4.1).
//!
//! Git plumbing is done by shelling out to the `git` binary (the same
//! subprocess-wrapping style the teacher uses for Docker and `gh`), rather
//! than linking `git2`; no pack member that implements actual git-history
//! mutation uses a libgit2 binding either — they all wrap the CLI.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GitEngineError;
use crate::naming::workpad_branch_name;

type Result<T> = std::result::Result<T, GitEngineError>;

/// A single commit record as surfaced by `get_history` (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub short_sha: String,
    pub message: String,
    pub author: String,
    pub date: DateTime<Utc>,
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingTreeStatus {
    pub current_branch: Option<String>,
    pub modified_files: Vec<String>,
    pub untracked_files: Vec<String>,
    pub is_clean: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoSource {
    Zip,
    Git,
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepoEntry {
    id: String,
    name: String,
    path: PathBuf,
    trunk_branch: String,
    source: RepoSource,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkpadStatus {
    Active,
    Promoted,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PadEntry {
    id: String,
    repo_id: String,
    title: String,
    branch_name: String,
    base_commit: String,
    status: WorkpadStatus,
}

/// Public, read-only view of a repository used by callers outside the engine.
#[derive(Debug, Clone)]
pub struct RepoInfo {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub trunk_branch: String,
    pub source: RepoSource,
    pub created_at: DateTime<Utc>,
}

/// Public, read-only view of a workpad used by callers outside the engine.
#[derive(Debug, Clone)]
pub struct WorkpadInfo {
    pub id: String,
    pub repo_id: String,
    pub title: String,
    pub branch_name: String,
    pub base_commit: String,
    pub status: WorkpadStatus,
}

#[derive(Default, Serialize, Deserialize)]
struct Registry {
    repos: HashMap<String, RepoEntry>,
    pads: HashMap<String, PadEntry>,
}

/// Owns a `base_dir` under which every managed repository gets its own
/// working-tree directory (`<base_dir>/repos/<repo_id>/`), plus a small JSON
/// registry (`<base_dir>/registry.json`) tracking repo/workpad metadata.
///
/// The registry and Git reality are kept in agreement after every mutating
/// call: a failed Git operation leaves the in-memory registry untouched.
pub struct GitEngine {
    base_dir: PathBuf,
    registry: Mutex<Registry>,
}

impl GitEngine {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(base_dir.join("repos"))?;
        let registry = load_registry(&base_dir)?;
        Ok(Self {
            base_dir,
            registry: Mutex::new(registry),
        })
    }

    fn registry_path(&self) -> PathBuf {
        self.base_dir.join("registry.json")
    }

    fn persist_registry(&self, reg: &Registry) -> Result<()> {
        let json = serde_json::to_string_pretty(reg)
            .map_err(|e| GitEngineError::CommandFailed(e.to_string()))?;
        let path = self.registry_path();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn repo_path(&self, repo_id: &str) -> PathBuf {
        self.base_dir.join("repos").join(repo_id)
    }

    /// Force the in-memory registry to disk. Every mutating method already
    /// persists on its own; this is exposed publicly (not as a private
    /// reach-through) for callers like [`crate::git_state_sync::GitStateSync`]
    /// that need to guarantee a flush after touching engine-owned metadata
    /// through a borrowed reference.
    pub fn save_metadata(&self) -> Result<()> {
        let reg = self.registry.lock().unwrap();
        self.persist_registry(&reg)
    }

    fn repo_entry(&self, repo_id: &str) -> Result<RepoEntry> {
        self.registry
            .lock()
            .unwrap()
            .repos
            .get(repo_id)
            .cloned()
            .ok_or_else(|| GitEngineError::RepoNotFound(repo_id.to_string()))
    }

    fn pad_entry(&self, pad_id: &str) -> Result<PadEntry> {
        self.registry
            .lock()
            .unwrap()
            .pads
            .get(pad_id)
            .cloned()
            .ok_or_else(|| GitEngineError::WorkpadNotFound(pad_id.to_string()))
    }

    // ── public read-throughs ────────────────────────────────────────────

    pub fn get_repo(&self, repo_id: &str) -> Option<RepoInfo> {
        self.registry.lock().unwrap().repos.get(repo_id).map(|r| RepoInfo {
            id: r.id.clone(),
            name: r.name.clone(),
            path: r.path.clone(),
            trunk_branch: r.trunk_branch.clone(),
            source: r.source,
            created_at: r.created_at,
        })
    }

    pub fn list_repos(&self) -> Vec<RepoInfo> {
        self.registry
            .lock()
            .unwrap()
            .repos
            .values()
            .map(|r| RepoInfo {
                id: r.id.clone(),
                name: r.name.clone(),
                path: r.path.clone(),
                trunk_branch: r.trunk_branch.clone(),
                source: r.source,
                created_at: r.created_at,
            })
            .collect()
    }

    pub fn get_workpad(&self, pad_id: &str) -> Option<WorkpadInfo> {
        self.registry.lock().unwrap().pads.get(pad_id).map(pad_to_info)
    }

    pub fn list_workpads(&self, repo_id: &str) -> Vec<WorkpadInfo> {
        self.registry
            .lock()
            .unwrap()
            .pads
            .values()
            .filter(|p| p.repo_id == repo_id)
            .map(pad_to_info)
            .collect()
    }

    // ── repository lifecycle ────────────────────────────────────────────

    /// Initialize a fresh working tree from a zip archive's bytes, commit all
    /// files as the initial commit on `main`.
    pub fn init_from_zip(&self, bytes: &[u8], name: &str) -> Result<String> {
        let repo_id = uuid::Uuid::new_v4().to_string();
        let path = self.repo_path(&repo_id);
        std::fs::create_dir_all(&path)?;

        extract_zip(bytes, &path)?;

        run_git(&path, &["init", "-q", "-b", "main"])?;
        run_git(&path, &["add", "-A"])?;
        run_git_allow_empty_author(&path, &["commit", "-q", "-m", "Initial commit"])?;

        self.register_repo(repo_id.clone(), name, path, "main", RepoSource::Zip)?;
        Ok(repo_id)
    }

    /// Clone a remote and normalize the trunk branch name to `main`.
    pub fn init_from_git(&self, url: &str, name: Option<&str>) -> Result<String> {
        let repo_id = uuid::Uuid::new_v4().to_string();
        let path = self.repo_path(&repo_id);

        let status = Command::new("git")
            .args(["clone", "-q", url, &path.display().to_string()])
            .status()
            .map_err(|e| GitEngineError::CommandFailed(e.to_string()))?;
        if !status.success() {
            return Err(GitEngineError::CommandFailed(format!("git clone {url} failed")));
        }

        let current = run_git(&path, &["symbolic-ref", "--short", "HEAD"])?
            .trim()
            .to_string();
        if current != "main" {
            run_git(&path, &["branch", "-m", &current, "main"])?;
        }

        let derived_name = name
            .map(str::to_string)
            .unwrap_or_else(|| url.rsplit('/').next().unwrap_or("repo").trim_end_matches(".git").to_string());

        self.register_repo(repo_id.clone(), &derived_name, path, "main", RepoSource::Git)?;
        Ok(repo_id)
    }

    /// Initialize an empty Git repo with an initial empty commit on `main`.
    pub fn create_empty_repo(&self, name: &str, path: Option<&Path>) -> Result<String> {
        let repo_id = uuid::Uuid::new_v4().to_string();
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| self.repo_path(&repo_id));
        std::fs::create_dir_all(&path)?;

        run_git(&path, &["init", "-q", "-b", "main"])?;
        run_git_allow_empty_author(&path, &["commit", "-q", "--allow-empty", "-m", "Initial commit"])?;

        self.register_repo(repo_id.clone(), name, path, "main", RepoSource::Empty)?;
        Ok(repo_id)
    }

    fn register_repo(
        &self,
        repo_id: String,
        name: &str,
        path: PathBuf,
        trunk_branch: &str,
        source: RepoSource,
    ) -> Result<()> {
        let mut reg = self.registry.lock().unwrap();
        reg.repos.insert(
            repo_id.clone(),
            RepoEntry {
                id: repo_id,
                name: name.to_string(),
                path,
                trunk_branch: trunk_branch.to_string(),
                source,
                created_at: Utc::now(),
            },
        );
        self.persist_registry(&reg)
    }

    pub fn delete_repository(&self, repo_id: &str, remove_files: bool) -> Result<()> {
        let entry = self.repo_entry(repo_id)?;

        if remove_files && entry.path.exists() {
            std::fs::remove_dir_all(&entry.path)?;
        }

        let mut reg = self.registry.lock().unwrap();
        reg.repos.remove(repo_id);
        reg.pads.retain(|_, p| p.repo_id != repo_id);
        self.persist_registry(&reg)
    }

    // ── workpad lifecycle ───────────────────────────────────────────────

    pub fn create_workpad(&self, repo_id: &str, title: &str) -> Result<String> {
        let entry = self.repo_entry(repo_id)?;
        let branch_name = workpad_branch_name(title);
        let base_commit = run_git(&entry.path, &["rev-parse", &entry.trunk_branch])?
            .trim()
            .to_string();

        run_git(&entry.path, &["branch", &branch_name, &base_commit])?;

        let pad_id = uuid::Uuid::new_v4().to_string();
        let mut reg = self.registry.lock().unwrap();
        reg.pads.insert(
            pad_id.clone(),
            PadEntry {
                id: pad_id.clone(),
                repo_id: repo_id.to_string(),
                title: title.to_string(),
                branch_name,
                base_commit,
                status: WorkpadStatus::Active,
            },
        );
        self.persist_registry(&reg)?;
        Ok(pad_id)
    }

    /// Apply a unified diff to a workpad's branch and commit it.
    ///
    /// Atomic at the commit level: on apply failure the index is reset
    /// before the error is returned, so the working tree is left clean.
    pub fn apply_patch(&self, pad_id: &str, patch: &str, message: Option<&str>) -> Result<String> {
        let pad = self.pad_entry(pad_id)?;
        let repo = self.repo_entry(&pad.repo_id)?;

        run_git(&repo.path, &["checkout", "-q", &pad.branch_name])?;

        let patch_file = repo.path.join(".solo-git-patch.diff");
        std::fs::write(&patch_file, patch)?;

        let apply_result = run_git(&repo.path, &["apply", "--index", "--3way", &patch_file.display().to_string()]);
        let _ = std::fs::remove_file(&patch_file);

        if let Err(e) = apply_result {
            // restore the index/working tree before surfacing the failure.
            let _ = run_git(&repo.path, &["reset", "--hard", "HEAD"]);
            return Err(GitEngineError::PatchApplyFailed(e.to_string()));
        }

        let message = message.unwrap_or("Apply patch");
        run_git(&repo.path, &["commit", "-q", "-m", message])?;
        let new_head = run_git(&repo.path, &["rev-parse", "HEAD"])?.trim().to_string();

        let mut reg = self.registry.lock().unwrap();
        // nothing else to update on the PadEntry itself — current_commit is
        // tracked by the state layer (GitStateSync), the engine only owns
        // the Git object store.
        let _ = &mut reg;
        Ok(new_head)
    }

    /// True iff the trunk tip is an ancestor of the pad tip (fast-forward possible).
    pub fn can_promote(&self, pad_id: &str) -> Result<bool> {
        let pad = self.pad_entry(pad_id)?;
        let repo = self.repo_entry(&pad.repo_id)?;
        let trunk_tip = run_git(&repo.path, &["rev-parse", &repo.trunk_branch])?.trim().to_string();
        let pad_tip = run_git(&repo.path, &["rev-parse", &pad.branch_name])?.trim().to_string();

        if trunk_tip == pad_tip {
            return Ok(true);
        }
        let status = Command::new("git")
            .current_dir(&repo.path)
            .args(["merge-base", "--is-ancestor", &trunk_tip, &pad_tip])
            .status()
            .map_err(|e| GitEngineError::CommandFailed(e.to_string()))?;
        Ok(status.success())
    }

    pub fn promote_workpad(&self, pad_id: &str) -> Result<String> {
        if !self.can_promote(pad_id)? {
            return Err(GitEngineError::CannotPromote { pad_id: pad_id.to_string() });
        }
        let pad = self.pad_entry(pad_id)?;
        let repo = self.repo_entry(&pad.repo_id)?;

        let pad_tip = run_git(&repo.path, &["rev-parse", &pad.branch_name])?.trim().to_string();
        run_git(&repo.path, &["checkout", "-q", &repo.trunk_branch])?;
        run_git(&repo.path, &["merge", "-q", "--ff-only", &pad_tip])?;
        run_git(&repo.path, &["branch", "-D", &pad.branch_name])?;

        let mut reg = self.registry.lock().unwrap();
        if let Some(p) = reg.pads.get_mut(pad_id) {
            p.status = WorkpadStatus::Promoted;
        }
        self.persist_registry(&reg)?;
        Ok(pad_tip)
    }

    pub fn delete_workpad(&self, pad_id: &str, force: bool) -> Result<()> {
        let pad = self.pad_entry(pad_id)?;
        let repo = self.repo_entry(&pad.repo_id)?;

        if !force && !self.can_promote(pad_id)? {
            return Err(GitEngineError::CommandFailed(format!(
                "workpad {pad_id} is not merged into trunk; pass force=true to delete anyway"
            )));
        }

        let flag = if force { "-D" } else { "-d" };
        run_git(&repo.path, &[flag, &pad.branch_name])?;

        let mut reg = self.registry.lock().unwrap();
        if let Some(p) = reg.pads.get_mut(pad_id) {
            p.status = WorkpadStatus::Deleted;
        }
        self.persist_registry(&reg)
    }

    /// Create a commit that inverts the trunk tip.
    pub fn revert_last_commit(&self, repo_id: &str) -> Result<String> {
        let repo = self.repo_entry(repo_id)?;
        run_git(&repo.path, &["checkout", "-q", &repo.trunk_branch])?;
        run_git(&repo.path, &["revert", "--no-edit", "HEAD"])?;
        Ok(run_git(&repo.path, &["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn get_diff(&self, pad_id: &str, base: &str) -> Result<String> {
        let pad = self.pad_entry(pad_id)?;
        let repo = self.repo_entry(&pad.repo_id)?;
        let base_ref = if base == "trunk" { repo.trunk_branch.clone() } else { base.to_string() };
        run_git(&repo.path, &["diff", &base_ref, &pad.branch_name])
    }

    pub fn get_history(&self, repo_id: &str, limit: usize, branch: Option<&str>) -> Result<Vec<CommitRecord>> {
        let repo = self.repo_entry(repo_id)?;
        let branch = branch.unwrap_or(&repo.trunk_branch);
        let format = "%H%x1f%h%x1f%s%x1f%an%x1f%aI%x1f%P%x1e";
        let out = run_git(
            &repo.path,
            &["log", &format!("-{limit}"), &format!("--pretty=format:{format}"), "--first-parent", branch],
        )?;

        let mut records = Vec::new();
        for entry in out.split('\u{1e}') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let fields: Vec<&str> = entry.split('\u{1f}').collect();
            if fields.len() < 6 {
                continue;
            }
            let parents: Vec<String> = fields[5].split_whitespace().map(str::to_string).collect();
            records.push(CommitRecord {
                sha: fields[0].to_string(),
                short_sha: fields[1].to_string(),
                message: fields[2].to_string(),
                author: fields[3].to_string(),
                date: fields[4].parse().unwrap_or_else(|_| Utc::now()),
                parents,
            });
        }
        Ok(records)
    }

    pub fn get_status(&self, repo_id: &str, pad_id: Option<&str>) -> Result<WorkingTreeStatus> {
        let repo = self.repo_entry(repo_id)?;
        if let Some(pad_id) = pad_id {
            let pad = self.pad_entry(pad_id)?;
            run_git(&repo.path, &["checkout", "-q", &pad.branch_name])?;
        }

        let porcelain = run_git(&repo.path, &["status", "--porcelain"])?;
        let mut modified = Vec::new();
        let mut untracked = Vec::new();
        for line in porcelain.lines() {
            if line.len() < 3 {
                continue;
            }
            let (status, path) = line.split_at(2);
            let path = path.trim();
            if status.starts_with("??") {
                untracked.push(path.to_string());
            } else {
                modified.push(path.to_string());
            }
        }

        let current_branch = run_git(&repo.path, &["symbolic-ref", "--short", "-q", "HEAD"])
            .ok()
            .map(|s| s.trim().to_string());

        Ok(WorkingTreeStatus {
            is_clean: modified.is_empty() && untracked.is_empty(),
            modified_files: modified,
            untracked_files: untracked,
            current_branch,
        })
    }
}

fn pad_to_info(p: &PadEntry) -> WorkpadInfo {
    WorkpadInfo {
        id: p.id.clone(),
        repo_id: p.repo_id.clone(),
        title: p.title.clone(),
        branch_name: p.branch_name.clone(),
        base_commit: p.base_commit.clone(),
        status: p.status,
    }
}

fn load_registry(base_dir: &Path) -> Result<Registry> {
    let path = base_dir.join("registry.json");
    if !path.exists() {
        return Ok(Registry::default());
    }
    let content = std::fs::read_to_string(&path)?;
    serde_json::from_str(&content).map_err(|e| GitEngineError::CommandFailed(e.to_string()))
}

fn run_git(repo_path: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .map_err(|e| GitEngineError::CommandFailed(format!("failed to spawn git {args:?}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(GitEngineError::CommandFailed(format!("git {args:?} failed: {stderr}")));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Like `run_git`, but sets a deterministic author/committer identity so
/// commits succeed in environments without a global `user.name`/`user.email`.
fn run_git_allow_empty_author(repo_path: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .env("GIT_AUTHOR_NAME", "Solo Git")
        .env("GIT_AUTHOR_EMAIL", "solo-git@localhost")
        .env("GIT_COMMITTER_NAME", "Solo Git")
        .env("GIT_COMMITTER_EMAIL", "solo-git@localhost")
        .args(args)
        .output()
        .map_err(|e| GitEngineError::CommandFailed(format!("failed to spawn git {args:?}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(GitEngineError::CommandFailed(format!("git {args:?} failed: {stderr}")));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn extract_zip(bytes: &[u8], dest: &Path) -> Result<()> {
    let reader = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| GitEngineError::CommandFailed(e.to_string()))?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| GitEngineError::CommandFailed(e.to_string()))?;
        let out_path = match file.enclosed_name() {
            Some(path) => dest.join(path),
            None => continue,
        };

        if file.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = std::fs::File::create(&out_path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        out_file.write_all_wrapper(&buf)?;
    }
    Ok(())
}

trait WriteAllWrapper {
    fn write_all_wrapper(&mut self, buf: &[u8]) -> std::io::Result<()>;
}

impl WriteAllWrapper for std::fs::File {
    fn write_all_wrapper(&mut self, buf: &[u8]) -> std::io::Result<()> {
        use std::io::Write;
        self.write_all(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine() -> (GitEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = GitEngine::new(dir.path()).unwrap();
        (engine, dir)
    }

    #[test]
    fn create_empty_repo_has_main_trunk() {
        let (engine, _dir) = engine();
        let repo_id = engine.create_empty_repo("demo", None).unwrap();
        let info = engine.get_repo(&repo_id).unwrap();
        assert_eq!(info.trunk_branch, "main");
        assert_eq!(info.source, RepoSource::Empty);
    }

    #[test]
    fn create_workpad_records_base_commit() {
        let (engine, _dir) = engine();
        let repo_id = engine.create_empty_repo("demo", None).unwrap();
        let pad_id = engine.create_workpad(&repo_id, "docs").unwrap();
        let pad = engine.get_workpad(&pad_id).unwrap();
        assert_eq!(pad.repo_id, repo_id);
        assert!(pad.branch_name.starts_with("pads/docs-"));
        assert!(!pad.base_commit.is_empty());
    }

    #[test]
    fn apply_patch_and_promote_happy_path() {
        let (engine, _dir) = engine();
        let repo_id = engine.create_empty_repo("demo", None).unwrap();
        let pad_id = engine.create_workpad(&repo_id, "notes").unwrap();

        let patch = "--- /dev/null\n+++ b/NOTES.md\n@@ -0,0 +1 @@\n+hello\n";
        engine.apply_patch(&pad_id, patch, Some("add notes")).unwrap();

        assert!(engine.can_promote(&pad_id).unwrap());
        let new_head = engine.promote_workpad(&pad_id).unwrap();
        assert!(!new_head.is_empty());

        let pad = engine.get_workpad(&pad_id).unwrap();
        assert_eq!(pad.status, WorkpadStatus::Promoted);
    }

    #[test]
    fn non_fast_forward_cannot_promote() {
        let (engine, _dir) = engine();
        let repo_id = engine.create_empty_repo("demo", None).unwrap();
        let pad_a = engine.create_workpad(&repo_id, "a").unwrap();
        let pad_b = engine.create_workpad(&repo_id, "b").unwrap();

        let patch_a = "--- /dev/null\n+++ b/a.txt\n@@ -0,0 +1 @@\n+a\n";
        let patch_b = "--- /dev/null\n+++ b/b.txt\n@@ -0,0 +1 @@\n+b\n";
        engine.apply_patch(&pad_a, patch_a, None).unwrap();
        engine.apply_patch(&pad_b, patch_b, None).unwrap();

        engine.promote_workpad(&pad_a).unwrap();
        assert!(!engine.can_promote(&pad_b).unwrap());
        assert!(matches!(
            engine.promote_workpad(&pad_b),
            Err(GitEngineError::CannotPromote { .. })
        ));
    }

    #[test]
    fn empty_workpad_diff_is_promotable() {
        let (engine, _dir) = engine();
        let repo_id = engine.create_empty_repo("demo", None).unwrap();
        let pad_id = engine.create_workpad(&repo_id, "noop").unwrap();
        assert_eq!(engine.get_diff(&pad_id, "trunk").unwrap(), "");
        assert!(engine.can_promote(&pad_id).unwrap());
    }

    #[test]
    fn delete_repository_cascades_workpads() {
        let (engine, _dir) = engine();
        let repo_id = engine.create_empty_repo("demo", None).unwrap();
        let pad_id = engine.create_workpad(&repo_id, "docs").unwrap();
        engine.delete_repository(&repo_id, true).unwrap();

        assert!(engine.get_repo(&repo_id).is_none());
        assert!(engine.get_workpad(&pad_id).is_none());
    }

    #[test]
    fn revert_last_commit_adds_inverse_commit() {
        let (engine, _dir) = engine();
        let repo_id = engine.create_empty_repo("demo", None).unwrap();
        let pad_id = engine.create_workpad(&repo_id, "notes").unwrap();
        let patch = "--- /dev/null\n+++ b/NOTES.md\n@@ -0,0 +1 @@\n+hello\n";
        engine.apply_patch(&pad_id, patch, None).unwrap();
        let promoted = engine.promote_workpad(&pad_id).unwrap();

        let reverted = engine.revert_last_commit(&repo_id).unwrap();
        assert_ne!(reverted, promoted);

        let history = engine.get_history(&repo_id, 10, None).unwrap();
        assert_eq!(history[0].parents, vec![promoted]);
    }
}
