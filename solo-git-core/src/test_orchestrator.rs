//! Test orchestration: runs a workpad's test suite under Docker or a bare
//! subprocess, respecting a dependency DAG between tests, streaming live
//! output, enforcing timeouts by killing the child, and collecting resource
//! metrics (§4.2).
//!
//! The original offloads to `asyncio` for concurrency; this port uses plain
//! OS threads, `std::sync::mpsc`, and scoped threads (`std::thread::scope`)
//! instead, matching the teacher's avoidance of an async runtime dependency
//! anywhere in its own engine code (Docker waits and `gh` calls are all
//! blocking subprocess calls there too). Scoped threads let the per-test
//! output-streaming readers borrow the caller's `on_output` callback
//! directly, without requiring it to be `'static` or cloned per test.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::error::TestOrchestratorError;
use crate::git_engine::GitEngine;
use crate::model::ExecutionMode;

type Result<T> = std::result::Result<T, TestOrchestratorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModePreference {
    Auto,
    Docker,
    Subprocess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Timeout,
    Error,
    Skipped,
}

/// Which stream a streamed output line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Called with `(test_name, stream, line)` for every line of output as it is
/// produced, in both Docker and subprocess mode. Invoked concurrently from
/// one thread per in-flight test under parallel execution, hence `Sync`.
pub type OutputCallback<'a> = dyn Fn(&str, OutputStream, &str) + Send + Sync + 'a;

/// Called once per test as soon as its [`TestResult`] is known.
pub type CompleteCallback<'a> = dyn Fn(&TestResult) + Send + Sync + 'a;

/// Cooperative cancellation flag shared between a caller and an in-flight
/// `run_tests` call. Cancelling kills any running child (or stops any
/// running container) and marks tests not yet started as `error`.
#[derive(Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.map(CancellationToken::is_cancelled).unwrap_or(false)
}

/// One test definition, including its dependency edges (§4.2).
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub name: String,
    pub cmd: String,
    pub timeout: Duration,
    pub depends_on: Vec<String>,
}

impl TestConfig {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            timeout: Duration::from_secs(300),
            depends_on: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub log_path: Option<String>,
    pub metrics: HashMap<String, f64>,
    pub mode: ExecutionMode,
}

/// Aggregate view over a batch of [`TestResult`]s (§4.2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TestRunSummary {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub timeout: u32,
    pub error: u32,
    pub skipped: u32,
    pub status: String,
}

pub fn get_summary(results: &[TestResult]) -> TestRunSummary {
    let total = results.len() as u32;
    let passed = results.iter().filter(|r| r.status == TestStatus::Passed).count() as u32;
    let failed = results.iter().filter(|r| r.status == TestStatus::Failed).count() as u32;
    let timeout = results.iter().filter(|r| r.status == TestStatus::Timeout).count() as u32;
    let error = results.iter().filter(|r| r.status == TestStatus::Error).count() as u32;
    let skipped = results.iter().filter(|r| r.status == TestStatus::Skipped).count() as u32;
    let status = if failed == 0 && timeout == 0 && error == 0 { "green" } else { "red" }.to_string();
    TestRunSummary { total, passed, failed, timeout, error, skipped, status }
}

pub struct TestOrchestrator {
    sandbox_image: String,
    requested_mode: ExecutionModePreference,
    mode: ExecutionMode,
    log_dir: PathBuf,
}

impl TestOrchestrator {
    pub fn new(
        sandbox_image: impl Into<String>,
        requested_mode: ExecutionModePreference,
        log_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let log_dir = log_dir.into();
        std::fs::create_dir_all(&log_dir)?;

        let docker_available = docker_reachable();
        let mode = match requested_mode {
            ExecutionModePreference::Subprocess => ExecutionMode::Subprocess,
            ExecutionModePreference::Docker => {
                if docker_available {
                    ExecutionMode::Docker
                } else {
                    return Err(TestOrchestratorError::DockerUnavailable);
                }
            }
            ExecutionModePreference::Auto => {
                if docker_available {
                    ExecutionMode::Docker
                } else {
                    ExecutionMode::Subprocess
                }
            }
        };

        Ok(Self {
            sandbox_image: sandbox_image.into(),
            requested_mode,
            mode,
            log_dir,
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Run `tests` against the workpad's working tree, streaming output
    /// through `on_output` and notifying `on_complete` as each test finishes.
    /// Either callback may be omitted; `cancel` may be omitted for a run that
    /// cannot be interrupted early.
    ///
    /// Validates the dependency DAG up front for **both** execution paths
    /// (the dependency graph either holds or it doesn't — whether the caller
    /// asked for parallel execution is irrelevant to that check).
    #[allow(clippy::too_many_arguments)]
    pub fn run_tests(
        &self,
        git_engine: &GitEngine,
        pad_id: &str,
        tests: &[TestConfig],
        parallel: bool,
        on_output: Option<&OutputCallback>,
        on_complete: Option<&CompleteCallback>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<TestResult>> {
        let pad = git_engine
            .get_workpad(pad_id)
            .ok_or_else(|| TestOrchestratorError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, format!("workpad {pad_id} not found"))))?;
        let repo = git_engine
            .get_repo(&pad.repo_id)
            .ok_or_else(|| TestOrchestratorError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, format!("repo {} not found", pad.repo_id))))?;

        validate_dag(tests)?;

        if parallel {
            self.run_parallel(&repo.path, tests, on_output, on_complete, cancel)
        } else {
            self.run_sequential(&repo.path, tests, on_output, on_complete, cancel)
        }
    }

    /// Convenience wrapper with no callbacks and no cancellation — every
    /// execution path in this crate is already blocking, so unlike the
    /// original's `asyncio.run(...)` wrapper this is a plain forwarding call.
    pub fn run_tests_sync(&self, git_engine: &GitEngine, pad_id: &str, tests: &[TestConfig], parallel: bool) -> Result<Vec<TestResult>> {
        self.run_tests(git_engine, pad_id, tests, parallel, None, None, None)
    }

    fn run_sequential(
        &self,
        repo_path: &Path,
        tests: &[TestConfig],
        on_output: Option<&OutputCallback>,
        on_complete: Option<&CompleteCallback>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<TestResult>> {
        let ordered = topological_order(tests)?;
        let mut result_map: HashMap<String, TestResult> = HashMap::new();

        for test in &ordered {
            let result = if is_cancelled(cancel) {
                cancelled_result(test, self.mode)
            } else {
                let blocked = blocked_dependencies(test, &result_map);
                if blocked.is_empty() {
                    self.run_single(repo_path, test, on_output, cancel)
                } else {
                    skipped_result(test, &blocked, self.mode)
                }
            };
            if let Some(cb) = on_complete {
                cb(&result);
            }
            result_map.insert(test.name.clone(), result);
        }

        Ok(reorder_to_input(tests, result_map))
    }

    fn run_parallel(
        &self,
        repo_path: &Path,
        tests: &[TestConfig],
        on_output: Option<&OutputCallback>,
        on_complete: Option<&CompleteCallback>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<TestResult>> {
        let graph = dependency_graph(tests);
        let sandbox_image = self.sandbox_image.as_str();
        let mode = self.mode;
        let log_dir = self.log_dir.as_path();

        let mut result_map: HashMap<String, TestResult> = HashMap::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut running: HashSet<String> = HashSet::new();

        let (tx, rx) = mpsc::channel::<TestResult>();

        std::thread::scope(|scope| -> Result<()> {
            while completed.len() < tests.len() {
                let run_cancelled = is_cancelled(cancel);

                for test in tests {
                    if completed.contains(&test.name) || running.contains(&test.name) {
                        continue;
                    }
                    let result = if run_cancelled {
                        Some(cancelled_result(test, mode))
                    } else {
                        let blocked = blocked_dependencies(test, &result_map);
                        if blocked.is_empty() { None } else { Some(skipped_result(test, &blocked, mode)) }
                    };
                    if let Some(result) = result {
                        if let Some(cb) = on_complete {
                            cb(&result);
                        }
                        completed.insert(test.name.clone());
                        result_map.insert(test.name.clone(), result);
                    }
                }

                if completed.len() >= tests.len() {
                    break;
                }

                let ready: Vec<&TestConfig> = tests
                    .iter()
                    .filter(|t| !completed.contains(&t.name) && !running.contains(&t.name))
                    .filter(|t| graph.get(t.name.as_str()).into_iter().flatten().all(|d| completed.contains(d.as_str())))
                    .collect();

                if ready.is_empty() && running.is_empty() {
                    return Err(TestOrchestratorError::Deadlock);
                }

                for test in ready {
                    running.insert(test.name.clone());
                    let tx = tx.clone();
                    scope.spawn(move || {
                        let result = run_single_blocking(repo_path, test, mode, sandbox_image, log_dir, on_output, cancel);
                        let _ = tx.send(result);
                    });
                }

                if !running.is_empty() {
                    // block for at least one completion, then drain whatever else is ready.
                    if let Ok(result) = rx.recv() {
                        running.remove(&result.name);
                        completed.insert(result.name.clone());
                        if let Some(cb) = on_complete {
                            cb(&result);
                        }
                        result_map.insert(result.name.clone(), result);
                    }
                    while let Ok(result) = rx.try_recv() {
                        running.remove(&result.name);
                        completed.insert(result.name.clone());
                        if let Some(cb) = on_complete {
                            cb(&result);
                        }
                        result_map.insert(result.name.clone(), result);
                    }
                }
            }
            Ok(())
        })?;

        Ok(reorder_to_input(tests, result_map))
    }

    fn run_single(&self, repo_path: &Path, test: &TestConfig, on_output: Option<&OutputCallback>, cancel: Option<&CancellationToken>) -> TestResult {
        run_single_blocking(repo_path, test, self.mode, &self.sandbox_image, &self.log_dir, on_output, cancel)
    }
}

fn cancelled_result(test: &TestConfig, mode: ExecutionMode) -> TestResult {
    TestResult {
        name: test.name.clone(),
        status: TestStatus::Error,
        duration_ms: 0,
        exit_code: -1,
        stdout: String::new(),
        stderr: String::new(),
        error: Some("run cancelled before this test started".to_string()),
        log_path: None,
        metrics: HashMap::new(),
        mode,
    }
}

fn reorder_to_input(tests: &[TestConfig], mut result_map: HashMap<String, TestResult>) -> Vec<TestResult> {
    tests
        .iter()
        .filter_map(|t| result_map.remove(&t.name))
        .collect()
}

fn dependency_graph(tests: &[TestConfig]) -> HashMap<&str, Vec<String>> {
    tests.iter().map(|t| (t.name.as_str(), t.depends_on.clone())).collect()
}

fn blocked_dependencies(test: &TestConfig, result_map: &HashMap<String, TestResult>) -> Vec<TestResult> {
    test.depends_on
        .iter()
        .filter_map(|dep| result_map.get(dep))
        .filter(|r| r.status != TestStatus::Passed)
        .cloned()
        .collect()
}

fn skipped_result(test: &TestConfig, blocked: &[TestResult], mode: ExecutionMode) -> TestResult {
    let reason = blocked
        .iter()
        .map(|r| format!("{} ({:?})", r.name, r.status))
        .collect::<Vec<_>>()
        .join(", ");
    let message = format!("skipped due to dependency failure: {reason}");
    TestResult {
        name: test.name.clone(),
        status: TestStatus::Skipped,
        duration_ms: 0,
        exit_code: -1,
        stdout: String::new(),
        stderr: message.clone(),
        error: Some(message),
        log_path: None,
        metrics: HashMap::new(),
        mode,
    }
}

/// Validate the dependency graph has no cycle and no reference to an
/// unknown test name. Applies uniformly whether execution will be
/// sequential or parallel.
fn validate_dag(tests: &[TestConfig]) -> Result<()> {
    topological_order(tests).map(|_| ())
}

fn topological_order(tests: &[TestConfig]) -> Result<Vec<TestConfig>> {
    let lookup: HashMap<&str, &TestConfig> = tests.iter().map(|t| (t.name.as_str(), t)).collect();
    let mut ordered = Vec::new();
    let mut temporary = HashSet::new();
    let mut permanent = HashSet::new();

    fn visit<'a>(
        name: &'a str,
        lookup: &HashMap<&'a str, &'a TestConfig>,
        temporary: &mut HashSet<&'a str>,
        permanent: &mut HashSet<&'a str>,
        ordered: &mut Vec<TestConfig>,
    ) -> Result<()> {
        if permanent.contains(name) {
            return Ok(());
        }
        if temporary.contains(name) {
            return Err(TestOrchestratorError::DependencyCycle(name.to_string()));
        }
        let test = *lookup
            .get(name)
            .expect("visit is only called with names already present in lookup");

        temporary.insert(name);
        for dep in &test.depends_on {
            if !lookup.contains_key(dep.as_str()) {
                return Err(TestOrchestratorError::UnknownDependency {
                    test: name.to_string(),
                    dependency: dep.clone(),
                });
            }
            visit(dep, lookup, temporary, permanent, ordered)?;
        }
        temporary.remove(name);
        permanent.insert(name);
        ordered.push(test.clone());
        Ok(())
    }

    for test in tests {
        if !permanent.contains(test.name.as_str()) {
            visit(&test.name, &lookup, &mut temporary, &mut permanent, &mut ordered)?;
        }
    }

    Ok(ordered)
}

fn docker_reachable() -> bool {
    Command::new("docker")
        .args(["info"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[allow(clippy::too_many_arguments)]
fn run_single_blocking(
    repo_path: &Path,
    test: &TestConfig,
    mode: ExecutionMode,
    sandbox_image: &str,
    log_dir: &Path,
    on_output: Option<&OutputCallback>,
    cancel: Option<&CancellationToken>,
) -> TestResult {
    match mode {
        ExecutionMode::Docker => run_in_docker(test, repo_path, sandbox_image, log_dir, on_output, cancel),
        ExecutionMode::Subprocess => run_subprocess(test, repo_path, log_dir, on_output, cancel),
    }
}

/// Outcome of waiting on a running child/container, deferring interpretation
/// (pass/fail/timeout/cancelled) to the caller once exit status is known.
enum WaitOutcome {
    Exited,
    TimedOut,
    Cancelled,
}

fn wait_for_child(child: &mut std::process::Child, timeout: Duration, cancel: Option<&CancellationToken>) -> std::result::Result<WaitOutcome, String> {
    let start = Instant::now();
    loop {
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(WaitOutcome::TimedOut);
        }
        if is_cancelled(cancel) {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(WaitOutcome::Cancelled);
        }
        match child.try_wait() {
            Ok(Some(_status)) => return Ok(WaitOutcome::Exited),
            Ok(None) => std::thread::sleep(Duration::from_millis(25)),
            Err(e) => return Err(e.to_string()),
        }
    }
}

fn read_streamed(pipe: impl Read, stream: OutputStream, test_name: &str, on_output: Option<&OutputCallback>) -> String {
    let mut reader = BufReader::new(pipe);
    let mut full = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                if let Some(cb) = on_output {
                    cb(test_name, stream, line.trim_end_matches('\n'));
                }
                full.push_str(&line);
            }
            Err(_) => break,
        }
    }
    full
}

fn run_subprocess(test: &TestConfig, repo_path: &Path, log_dir: &Path, on_output: Option<&OutputCallback>, cancel: Option<&CancellationToken>) -> TestResult {
    let start = Instant::now();

    if test.timeout.is_zero() {
        return finalize_result(
            test,
            start,
            TestStatus::Timeout,
            -1,
            String::new(),
            String::new(),
            Some("timed out (timeout is zero)".to_string()),
            ExecutionMode::Subprocess,
            HashMap::new(),
            log_dir,
        );
    }
    if is_cancelled(cancel) {
        return finalize_result(
            test,
            start,
            TestStatus::Error,
            -1,
            String::new(),
            String::new(),
            Some("cancelled before start".to_string()),
            ExecutionMode::Subprocess,
            HashMap::new(),
            log_dir,
        );
    }

    let usage_before = resource_usage_children();

    let mut child = match Command::new("/bin/sh")
        .arg("-c")
        .arg(&test.cmd)
        .current_dir(repo_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            return finalize_result(
                test,
                start,
                TestStatus::Error,
                -1,
                String::new(),
                String::new(),
                Some(e.to_string()),
                ExecutionMode::Subprocess,
                HashMap::new(),
                log_dir,
            )
        }
    };

    let stdout_pipe = child.stdout.take().expect("stdout piped at spawn");
    let stderr_pipe = child.stderr.take().expect("stderr piped at spawn");

    let (stdout_text, stderr_text, outcome) = std::thread::scope(|scope| {
        let out_handle = scope.spawn(|| read_streamed(stdout_pipe, OutputStream::Stdout, &test.name, on_output));
        let err_handle = scope.spawn(|| read_streamed(stderr_pipe, OutputStream::Stderr, &test.name, on_output));
        let outcome = wait_for_child(&mut child, test.timeout, cancel);
        let stdout_text = out_handle.join().unwrap_or_default();
        let stderr_text = err_handle.join().unwrap_or_default();
        (stdout_text, stderr_text, outcome)
    });

    let metrics = subprocess_metrics(usage_before, resource_usage_children());
    let exit_code = child.try_wait().ok().flatten().and_then(|s| s.code()).unwrap_or(-1);

    match outcome {
        Ok(WaitOutcome::Exited) => {
            let status = if exit_code == 0 { TestStatus::Passed } else { TestStatus::Failed };
            finalize_result(test, start, status, exit_code, stdout_text, stderr_text, None, ExecutionMode::Subprocess, metrics, log_dir)
        }
        Ok(WaitOutcome::TimedOut) => finalize_result(
            test,
            start,
            TestStatus::Timeout,
            -1,
            stdout_text,
            stderr_text,
            Some(format!("killed after exceeding {:?} timeout", test.timeout)),
            ExecutionMode::Subprocess,
            metrics,
            log_dir,
        ),
        Ok(WaitOutcome::Cancelled) => finalize_result(
            test,
            start,
            TestStatus::Error,
            -1,
            stdout_text,
            stderr_text,
            Some("cancelled".to_string()),
            ExecutionMode::Subprocess,
            metrics,
            log_dir,
        ),
        Err(e) => finalize_result(test, start, TestStatus::Error, -1, stdout_text, stderr_text, Some(e), ExecutionMode::Subprocess, metrics, log_dir),
    }
}

fn run_in_docker(
    test: &TestConfig,
    repo_path: &Path,
    sandbox_image: &str,
    log_dir: &Path,
    on_output: Option<&OutputCallback>,
    cancel: Option<&CancellationToken>,
) -> TestResult {
    let start = Instant::now();

    if test.timeout.is_zero() {
        return finalize_result(
            test,
            start,
            TestStatus::Timeout,
            -1,
            String::new(),
            String::new(),
            Some("timed out (timeout is zero)".to_string()),
            ExecutionMode::Docker,
            HashMap::new(),
            log_dir,
        );
    }
    if is_cancelled(cancel) {
        return finalize_result(
            test,
            start,
            TestStatus::Error,
            -1,
            String::new(),
            String::new(),
            Some("cancelled before start".to_string()),
            ExecutionMode::Docker,
            HashMap::new(),
            log_dir,
        );
    }

    let container = format!("sologit-{}-{}", sanitize_name(&test.name), uuid::Uuid::new_v4().simple());
    let volume = format!("{}:/workspace:ro", repo_path.display());

    let created = Command::new("docker")
        .args([
            "create",
            "--name",
            &container,
            "--network",
            "none",
            "--memory",
            "2g",
            "--cpus",
            "1",
            "-v",
            &volume,
            "-w",
            "/workspace",
            sandbox_image,
            "/bin/sh",
            "-c",
            &test.cmd,
        ])
        .output();

    let create_ok = matches!(&created, Ok(out) if out.status.success());
    if !create_ok {
        let message = match created {
            Ok(out) => String::from_utf8_lossy(&out.stderr).trim().to_string(),
            Err(e) => e.to_string(),
        };
        return finalize_result(test, start, TestStatus::Error, -1, String::new(), String::new(), Some(message), ExecutionMode::Docker, HashMap::new(), log_dir);
    }

    let started = Command::new("docker").args(["start", &container]).output();
    if !matches!(&started, Ok(out) if out.status.success()) {
        let _ = Command::new("docker").args(["rm", "-f", &container]).output();
        return finalize_result(
            test,
            start,
            TestStatus::Error,
            -1,
            String::new(),
            String::new(),
            Some("failed to start container".to_string()),
            ExecutionMode::Docker,
            HashMap::new(),
            log_dir,
        );
    }

    let mut logs_child = match Command::new("docker").args(["logs", "-f", &container]).stdout(Stdio::piped()).stderr(Stdio::piped()).spawn() {
        Ok(c) => c,
        Err(e) => {
            let _ = Command::new("docker").args(["rm", "-f", &container]).output();
            return finalize_result(test, start, TestStatus::Error, -1, String::new(), String::new(), Some(e.to_string()), ExecutionMode::Docker, HashMap::new(), log_dir);
        }
    };
    let out_pipe = logs_child.stdout.take().expect("stdout piped at spawn");
    let err_pipe = logs_child.stderr.take().expect("stderr piped at spawn");

    let (stdout_text, stderr_text, stats, wait_outcome) = std::thread::scope(|scope| {
        let out_handle = scope.spawn(|| read_streamed(out_pipe, OutputStream::Stdout, &test.name, on_output));
        let err_handle = scope.spawn(|| read_streamed(err_pipe, OutputStream::Stderr, &test.name, on_output));
        // sampled shortly after start — stats against an already-exited
        // container are unreliable, so this races the test itself.
        let stats_handle = scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(200));
            docker_stats_sample(&container)
        });

        // runs on this (the calling) thread, concurrently with the readers
        // above: stopping the container here is what lets `docker logs -f`
        // hit EOF and the reader threads return.
        let wait_outcome = wait_for_container(&container, test.timeout, cancel);

        let stdout_text = out_handle.join().unwrap_or_default();
        let stderr_text = err_handle.join().unwrap_or_default();
        let stats = stats_handle.join().unwrap_or_default();
        (stdout_text, stderr_text, stats, wait_outcome)
    });

    let exit_code = docker_exit_code(&container).unwrap_or(-1);
    let _ = logs_child.wait();
    let _ = Command::new("docker").args(["rm", "-f", &container]).output();

    match wait_outcome {
        WaitOutcome::Exited => {
            let status = if exit_code == 0 { TestStatus::Passed } else { TestStatus::Failed };
            finalize_result(test, start, status, exit_code, stdout_text, stderr_text, None, ExecutionMode::Docker, stats, log_dir)
        }
        WaitOutcome::TimedOut => finalize_result(
            test,
            start,
            TestStatus::Timeout,
            exit_code,
            stdout_text,
            stderr_text,
            Some(format!("container stopped after exceeding {:?} timeout", test.timeout)),
            ExecutionMode::Docker,
            stats,
            log_dir,
        ),
        WaitOutcome::Cancelled => {
            finalize_result(test, start, TestStatus::Error, exit_code, stdout_text, stderr_text, Some("cancelled".to_string()), ExecutionMode::Docker, stats, log_dir)
        }
    }
}

fn wait_for_container(container: &str, timeout: Duration, cancel: Option<&CancellationToken>) -> WaitOutcome {
    let start = Instant::now();
    loop {
        if start.elapsed() >= timeout {
            let _ = Command::new("docker").args(["stop", "-t", "5", container]).output();
            return WaitOutcome::TimedOut;
        }
        if is_cancelled(cancel) {
            let _ = Command::new("docker").args(["stop", "-t", "5", container]).output();
            return WaitOutcome::Cancelled;
        }
        match container_running(container) {
            Some(true) => std::thread::sleep(Duration::from_millis(150)),
            Some(false) | None => return WaitOutcome::Exited,
        }
    }
}

fn container_running(container: &str) -> Option<bool> {
    let out = Command::new("docker").args(["inspect", "-f", "{{.State.Running}}", container]).output().ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).trim() == "true")
}

fn docker_exit_code(container: &str) -> Option<i32> {
    let out = Command::new("docker").args(["inspect", "-f", "{{.State.ExitCode}}", container]).output().ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8_lossy(&out.stdout).trim().parse().ok()
}

/// One-shot `docker stats` sample (CPU percent, memory usage) — the
/// container's `--no-stream` snapshot rather than a continuous feed, to
/// avoid depending on a JSON-streaming crate for something this small.
fn docker_stats_sample(container: &str) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    let Ok(output) = Command::new("docker")
        .args(["stats", container, "--no-stream", "--format", "{{.CPUPerc}}\t{{.MemUsage}}"])
        .output()
    else {
        return metrics;
    };
    if !output.status.success() {
        return metrics;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let Some(line) = text.lines().next() else {
        return metrics;
    };
    let mut parts = line.split('\t');
    if let Some(cpu) = parts.next() {
        if let Ok(v) = cpu.trim().trim_end_matches('%').parse::<f64>() {
            metrics.insert("cpu_percent".to_string(), v);
        }
    }
    if let Some(used) = parts.next().and_then(|mem| mem.split('/').next()) {
        if let Some(mb) = parse_mem_to_mb(used.trim()) {
            metrics.insert("memory_usage_mb".to_string(), mb);
        }
    }
    metrics
}

fn parse_mem_to_mb(s: &str) -> Option<f64> {
    let split_at = s.find(|c: char| c.is_alphabetic())?;
    let (num, unit) = s.split_at(split_at);
    let value: f64 = num.trim().parse().ok()?;
    let mult = match unit.trim() {
        "B" => 1.0 / 1_000_000.0,
        "KiB" => 1024.0 / 1_000_000.0,
        "MiB" => 1024.0 * 1024.0 / 1_000_000.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0 / 1_000_000.0,
        _ => return None,
    };
    Some(value * mult)
}

#[derive(Debug, Clone, Copy)]
struct ResourceSnapshot {
    user_s: f64,
    sys_s: f64,
    max_rss_kb: f64,
    inblock: f64,
    oublock: f64,
}

/// `getrusage(RUSAGE_CHILDREN)` is process-wide: under concurrent test
/// execution the before/after delta for one test can include another
/// test's children too. The original has the same imprecision.
fn resource_usage_children() -> Option<ResourceSnapshot> {
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) != 0 {
            return None;
        }
        Some(ResourceSnapshot {
            user_s: usage.ru_utime.tv_sec as f64 + usage.ru_utime.tv_usec as f64 / 1_000_000.0,
            sys_s: usage.ru_stime.tv_sec as f64 + usage.ru_stime.tv_usec as f64 / 1_000_000.0,
            max_rss_kb: usage.ru_maxrss as f64,
            inblock: usage.ru_inblock as f64,
            oublock: usage.ru_oublock as f64,
        })
    }
}

fn subprocess_metrics(before: Option<ResourceSnapshot>, after: Option<ResourceSnapshot>) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    if let (Some(before), Some(after)) = (before, after) {
        metrics.insert("user_cpu_seconds".to_string(), (after.user_s - before.user_s).max(0.0));
        metrics.insert("system_cpu_seconds".to_string(), (after.sys_s - before.sys_s).max(0.0));
        metrics.insert("max_rss_kb".to_string(), after.max_rss_kb);
        metrics.insert("block_input_ops".to_string(), (after.inblock - before.inblock).max(0.0));
        metrics.insert("block_output_ops".to_string(), (after.oublock - before.oublock).max(0.0));
    }
    metrics
}

#[allow(clippy::too_many_arguments)]
fn finalize_result(
    test: &TestConfig,
    start: Instant,
    status: TestStatus,
    exit_code: i32,
    stdout: String,
    stderr: String,
    error: Option<String>,
    mode: ExecutionMode,
    mut metrics: HashMap<String, f64>,
    log_dir: &Path,
) -> TestResult {
    let duration_ms = start.elapsed().as_millis() as u64;
    metrics.insert("duration_ms".to_string(), duration_ms as f64);
    metrics.insert("exit_code".to_string(), exit_code as f64);
    let log_path = persist_log(log_dir, &test.name, mode, &stdout, &stderr, &metrics);

    TestResult {
        name: test.name.clone(),
        status,
        duration_ms,
        exit_code,
        stdout,
        stderr,
        error,
        log_path,
        metrics,
        mode,
    }
}

fn persist_log(log_dir: &Path, test_name: &str, mode: ExecutionMode, stdout: &str, stderr: &str, metrics: &HashMap<String, f64>) -> Option<String> {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%f").to_string();
    let safe_name = sanitize_name(test_name);
    let path = log_dir.join(format!("{timestamp}_{safe_name}.log"));

    let content = format!(
        "# Solo Git Test Run\nname: {test_name}\nmode: {mode:?}\nmetrics: {metrics:?}\n\n[stdout]\n{stdout}\n\n[stderr]\n{stderr}\n"
    );
    std::fs::write(&path, content).ok()?;
    Some(path.display().to_string())
}

fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' { c } else { '-' })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "test".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn all_tests_passed(results: &[TestResult]) -> bool {
    results.iter().all(|r| r.status == TestStatus::Passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir) -> TestOrchestrator {
        TestOrchestrator::new("irrelevant", ExecutionModePreference::Subprocess, dir.path()).unwrap()
    }

    #[test]
    fn sequential_preserves_input_order() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let tests = vec![
            TestConfig::new("c", "true"),
            TestConfig::new("a", "true"),
            TestConfig::new("b", "true"),
        ];
        let results = orch.run_sequential(dir.path(), &tests, None, None, None).unwrap();
        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert!(all_tests_passed(&results));
    }

    #[test]
    fn parallel_preserves_input_order() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let tests = vec![
            TestConfig::new("c", "true"),
            TestConfig::new("a", "true"),
            TestConfig::new("b", "true"),
        ];
        let results = orch.run_parallel(dir.path(), &tests, None, None, None).unwrap();
        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let mut a = TestConfig::new("a", "true");
        a.depends_on.push("b".to_string());
        let mut b = TestConfig::new("b", "true");
        b.depends_on.push("a".to_string());
        let err = validate_dag(&[a, b]).unwrap_err();
        assert!(matches!(err, TestOrchestratorError::DependencyCycle(_)));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut a = TestConfig::new("a", "true");
        a.depends_on.push("missing".to_string());
        let err = validate_dag(&[a]).unwrap_err();
        assert!(matches!(err, TestOrchestratorError::UnknownDependency { .. }));
    }

    #[test]
    fn failed_dependency_skips_dependent_sequential() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let mut dependent = TestConfig::new("dependent", "true");
        dependent.depends_on.push("base".to_string());
        let tests = vec![TestConfig::new("base", "false"), dependent];
        let results = orch.run_sequential(dir.path(), &tests, None, None, None).unwrap();
        assert_eq!(results[0].status, TestStatus::Failed);
        assert_eq!(results[1].status, TestStatus::Skipped);
    }

    #[test]
    fn failed_dependency_skips_dependent_parallel() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let mut dependent = TestConfig::new("dependent", "true");
        dependent.depends_on.push("base".to_string());
        let tests = vec![TestConfig::new("base", "false"), dependent];
        let results = orch.run_parallel(dir.path(), &tests, None, None, None).unwrap();
        assert_eq!(results[0].status, TestStatus::Failed);
        assert_eq!(results[1].status, TestStatus::Skipped);
    }

    #[test]
    fn subprocess_mode_runs_real_command() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let tests = vec![TestConfig::new("echo", "echo hello")];
        let results = orch.run_sequential(dir.path(), &tests, None, None, None).unwrap();
        assert_eq!(results[0].status, TestStatus::Passed);
        assert!(results[0].stdout.contains("hello"));
    }

    #[test]
    fn on_output_and_on_complete_are_invoked() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let tests = vec![TestConfig::new("echo", "echo hello")];

        let lines: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let completed: Mutex<Vec<String>> = Mutex::new(Vec::new());

        let on_output = |_name: &str, _stream: OutputStream, line: &str| {
            lines.lock().unwrap().push(line.to_string());
        };
        let on_complete = |result: &TestResult| {
            completed.lock().unwrap().push(result.name.clone());
        };

        let results = orch
            .run_sequential(dir.path(), &tests, Some(&on_output), Some(&on_complete), None)
            .unwrap();

        assert_eq!(results[0].status, TestStatus::Passed);
        assert!(lines.lock().unwrap().iter().any(|l| l.contains("hello")));
        assert_eq!(completed.into_inner().unwrap(), vec!["echo".to_string()]);
    }

    #[test]
    fn timeout_kills_the_child_instead_of_waiting_for_it() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let mut slow = TestConfig::new("slow", "sleep 5");
        slow.timeout = Duration::from_millis(150);

        let start = Instant::now();
        let results = orch.run_sequential(dir.path(), &[slow], None, None, None).unwrap();
        let elapsed = start.elapsed();

        assert_eq!(results[0].status, TestStatus::Timeout);
        assert!(elapsed < Duration::from_secs(3), "expected the sleep to be killed, took {elapsed:?}");
    }

    #[test]
    fn zero_timeout_returns_timeout_immediately() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let mut instant_timeout = TestConfig::new("never", "true");
        instant_timeout.timeout = Duration::ZERO;

        let start = Instant::now();
        let results = orch.run_sequential(dir.path(), &[instant_timeout], None, None, None).unwrap();

        assert_eq!(results[0].status, TestStatus::Timeout);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn cancelling_before_run_marks_tests_as_error() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let tests = vec![TestConfig::new("unit", "true")];
        let results = orch.run_sequential(dir.path(), &tests, None, None, Some(&cancel)).unwrap();
        assert_eq!(results[0].status, TestStatus::Error);
    }

    #[test]
    fn get_summary_reports_green_and_red() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let tests = vec![TestConfig::new("ok", "true")];
        let results = orch.run_sequential(dir.path(), &tests, None, None, None).unwrap();
        let summary = get_summary(&results);
        assert_eq!(summary.status, "green");
        assert_eq!(summary.total, 1);
        assert_eq!(summary.passed, 1);

        let tests = vec![TestConfig::new("bad", "false")];
        let results = orch.run_sequential(dir.path(), &tests, None, None, None).unwrap();
        let summary = get_summary(&results);
        assert_eq!(summary.status, "red");
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn run_tests_sync_runs_without_callbacks() {
        use crate::git_engine::GitEngine;
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let git_dir = TempDir::new().unwrap();
        let engine = GitEngine::new(git_dir.path()).unwrap();
        let repo_id = engine.create_empty_repo("demo", None).unwrap();
        let pad_id = engine.create_workpad(&repo_id, "feature").unwrap();

        let tests = vec![TestConfig::new("unit", "true")];
        let results = orch.run_tests_sync(&engine, &pad_id, &tests, false).unwrap();
        assert!(all_tests_passed(&results));
    }
}
