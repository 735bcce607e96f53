//! Diagnoses why a test run went red: categorizes failures, merges repeated
//! patterns, and suggests a fix complexity estimate (§4.3).

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::test_orchestrator::{TestResult, TestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    AssertionError,
    ImportError,
    SyntaxError,
    Timeout,
    DependencyError,
    NetworkError,
    PermissionError,
    ResourceError,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixComplexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    pub category: FailureCategory,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestAnalysis {
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    pub timeout: u32,
    pub error: u32,
    pub status: String,
    pub failure_patterns: Vec<FailurePattern>,
    pub suggested_actions: Vec<String>,
    pub estimated_fix_complexity: FixComplexity,
}

/// Ordered list of (category, patterns) — first match wins, same as the
/// original's dict-iteration order (Python dicts preserve insertion order).
fn error_patterns() -> Vec<(FailureCategory, Vec<Regex>)> {
    let compile = |patterns: &[&str]| patterns.iter().map(|p| Regex::new(&format!("(?i){p}")).unwrap()).collect();

    vec![
        (
            FailureCategory::AssertionError,
            compile(&["AssertionError", "assert .+ == .+", "Expected .+ but got .+", "Test failed"]),
        ),
        (
            FailureCategory::ImportError,
            compile(&["ImportError", "ModuleNotFoundError", "cannot import name", "No module named"]),
        ),
        (
            FailureCategory::SyntaxError,
            compile(&["SyntaxError", "invalid syntax", "unexpected EOF", "IndentationError"]),
        ),
        (
            FailureCategory::DependencyError,
            compile(&["DependencyError", "requires .+ to be installed", "pip install", "missing dependency"]),
        ),
        (
            FailureCategory::NetworkError,
            compile(&["ConnectionError", "TimeoutError", "Connection refused", "Network is unreachable"]),
        ),
        (
            FailureCategory::PermissionError,
            compile(&["PermissionError", "Permission denied", "Access denied", "Operation not permitted"]),
        ),
        (
            FailureCategory::ResourceError,
            compile(&["MemoryError", "Out of memory", "Disk full", "No space left"]),
        ),
    ]
}

pub struct TestAnalyzer {
    patterns: Vec<(FailureCategory, Vec<Regex>)>,
    message_patterns: Vec<Regex>,
    location_patterns: Vec<Regex>,
}

impl Default for TestAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAnalyzer {
    pub fn new() -> Self {
        Self {
            patterns: error_patterns(),
            message_patterns: vec![
                Regex::new(r"(?m)Error: (.+)").unwrap(),
                Regex::new(r"(?m)Exception: (.+)").unwrap(),
                Regex::new(r"(?m)AssertionError: (.+)").unwrap(),
                Regex::new(r"(?m)FAILED (.+)").unwrap(),
                Regex::new(r"(?m)(.+Error:.+)").unwrap(),
            ],
            location_patterns: vec![
                Regex::new(r#"File "([^"]+)", line (\d+)"#).unwrap(),
                Regex::new(r"(\w+\.py):(\d+)").unwrap(),
                Regex::new(r"at ([^:]+):(\d+)").unwrap(),
            ],
        }
    }

    pub fn analyze(&self, results: &[TestResult]) -> TestAnalysis {
        let passed = results.iter().filter(|r| r.status == TestStatus::Passed).count() as u32;
        let failed = results.iter().filter(|r| r.status == TestStatus::Failed).count() as u32;
        let timeout = results.iter().filter(|r| r.status == TestStatus::Timeout).count() as u32;
        let error = results.iter().filter(|r| r.status == TestStatus::Error).count() as u32;

        let status = if failed == 0 && timeout == 0 && error == 0 { "green" } else { "red" }.to_string();

        let failures: Vec<&TestResult> = results.iter().filter(|r| r.status != TestStatus::Passed).collect();
        let patterns = self.identify_patterns(&failures);
        let actions = self.suggest_actions(&patterns, failures.len());
        let complexity = estimate_complexity(&patterns);

        TestAnalysis {
            total_tests: results.len() as u32,
            passed,
            failed,
            timeout,
            error,
            status,
            failure_patterns: patterns,
            suggested_actions: actions,
            estimated_fix_complexity: complexity,
        }
    }

    fn identify_patterns(&self, failures: &[&TestResult]) -> Vec<FailurePattern> {
        let mut patterns = Vec::new();

        for result in failures {
            if result.status == TestStatus::Timeout {
                patterns.push(FailurePattern {
                    category: FailureCategory::Timeout,
                    message: format!("Test '{}' timed out", result.name),
                    file: None,
                    line: None,
                    count: 1,
                });
                continue;
            }

            let mut output = format!("{}{}", result.stdout, result.stderr);
            if let Some(err) = &result.error {
                output.push_str(err);
            }

            let category = self.categorize_failure(&output);
            let message = self.extract_error_message(&output).unwrap_or_else(|| format!("Test '{}' failed", result.name));
            let (file, line) = self.extract_file_location(&output);

            patterns.push(FailurePattern { category, message, file, line, count: 1 });
        }

        merge_patterns(patterns)
    }

    fn categorize_failure(&self, output: &str) -> FailureCategory {
        for (category, regexes) in &self.patterns {
            if regexes.iter().any(|re| re.is_match(output)) {
                return *category;
            }
        }
        FailureCategory::Unknown
    }

    fn extract_error_message(&self, output: &str) -> Option<String> {
        for re in &self.message_patterns {
            if let Some(caps) = re.captures(output) {
                let msg = caps.get(1)?.as_str().trim();
                return Some(truncate(msg, 200));
            }
        }
        output.lines().map(str::trim).find(|l| !l.is_empty()).map(|l| truncate(l, 200))
    }

    fn extract_file_location(&self, output: &str) -> (Option<String>, Option<u32>) {
        for re in &self.location_patterns {
            if let Some(caps) = re.captures(output) {
                let file = caps.get(1).map(|m| m.as_str().to_string());
                let line = caps.get(2).and_then(|m| m.as_str().parse().ok());
                return (file, line);
            }
        }
        (None, None)
    }

    fn suggest_actions(&self, patterns: &[FailurePattern], failure_count: usize) -> Vec<String> {
        let mut actions = Vec::new();
        if patterns.is_empty() {
            return actions;
        }

        let categories: std::collections::HashSet<FailureCategory> = patterns.iter().map(|p| p.category).collect();

        if categories.contains(&FailureCategory::ImportError) {
            actions.push("Check missing dependencies - install required packages".to_string());
            actions.push("Verify import paths and module names".to_string());
        }
        if categories.contains(&FailureCategory::SyntaxError) {
            actions.push("Fix syntax errors in the code".to_string());
            actions.push("Run a linter to catch syntax issues".to_string());
        }
        if categories.contains(&FailureCategory::AssertionError) {
            actions.push("Review test assertions and expected values".to_string());
            actions.push("Debug the failing test to understand the mismatch".to_string());
        }
        if categories.contains(&FailureCategory::Timeout) {
            actions.push("Optimize slow code or increase timeout limits".to_string());
            actions.push("Check for infinite loops or blocking operations".to_string());
        }
        if categories.contains(&FailureCategory::DependencyError) {
            actions.push("Install missing dependencies".to_string());
            actions.push("Update dependency versions if needed".to_string());
        }
        if categories.contains(&FailureCategory::NetworkError) {
            actions.push("Check network connectivity".to_string());
            actions.push("Verify service endpoints and configurations".to_string());
        }
        if categories.contains(&FailureCategory::PermissionError) {
            actions.push("Check file permissions".to_string());
            actions.push("Verify the process has the necessary access rights".to_string());
        }
        if categories.contains(&FailureCategory::ResourceError) {
            actions.push("Free up disk space or memory".to_string());
            actions.push("Optimize resource usage in tests".to_string());
        }

        actions.push("Review recent changes that may have introduced the issue".to_string());
        actions.push("Check test logs for detailed error messages".to_string());

        if failure_count > 3 {
            actions.push("Multiple tests failing - may indicate a systemic issue".to_string());
            actions.push("Look for common dependencies or configurations".to_string());
        }

        actions
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn merge_patterns(patterns: Vec<FailurePattern>) -> Vec<FailurePattern> {
    let mut merged: HashMap<(FailureCategory, String), FailurePattern> = HashMap::new();
    let mut order: Vec<(FailureCategory, String)> = Vec::new();

    for pattern in patterns {
        let key = (pattern.category, truncate(&pattern.message, 100));
        if let Some(existing) = merged.get_mut(&key) {
            existing.count += 1;
        } else {
            order.push(key.clone());
            merged.insert(key, pattern);
        }
    }

    let mut result: Vec<FailurePattern> = order.into_iter().map(|k| merged.remove(&k).unwrap()).collect();
    result.sort_by(|a, b| b.count.cmp(&a.count));
    result
}

fn estimate_complexity(patterns: &[FailurePattern]) -> FixComplexity {
    if patterns.is_empty() {
        return FixComplexity::Low;
    }

    let categories: std::collections::HashSet<FailureCategory> = patterns.iter().map(|p| p.category).collect();

    let high = [FailureCategory::Unknown, FailureCategory::ResourceError, FailureCategory::NetworkError];
    let medium = [FailureCategory::DependencyError, FailureCategory::PermissionError, FailureCategory::Timeout];

    let baseline = if high.iter().any(|c| categories.contains(c)) {
        FixComplexity::High
    } else if medium.iter().any(|c| categories.contains(c)) {
        FixComplexity::Medium
    } else {
        FixComplexity::Low
    };

    // many distinct categories, or many failures, promote the baseline by
    // one step regardless of which branch above set it.
    let total_failures: u32 = patterns.iter().map(|p| p.count).sum();
    if categories.len() > 2 || total_failures > 5 {
        return match baseline {
            FixComplexity::Low => FixComplexity::Medium,
            FixComplexity::Medium | FixComplexity::High => FixComplexity::High,
        };
    }

    baseline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionMode;
    use std::collections::HashMap as StdHashMap;

    fn result(name: &str, status: TestStatus, stdout: &str, stderr: &str) -> TestResult {
        TestResult {
            name: name.to_string(),
            status,
            duration_ms: 10,
            exit_code: if status == TestStatus::Passed { 0 } else { 1 },
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            error: None,
            log_path: None,
            metrics: StdHashMap::new(),
            mode: ExecutionMode::Subprocess,
        }
    }

    #[test]
    fn all_passed_is_green() {
        let analyzer = TestAnalyzer::new();
        let results = vec![result("a", TestStatus::Passed, "", "")];
        let analysis = analyzer.analyze(&results);
        assert_eq!(analysis.status, "green");
        assert!(analysis.failure_patterns.is_empty());
    }

    #[test]
    fn categorizes_import_error() {
        let analyzer = TestAnalyzer::new();
        let results = vec![result("a", TestStatus::Failed, "", "ModuleNotFoundError: no module named foo")];
        let analysis = analyzer.analyze(&results);
        assert_eq!(analysis.status, "red");
        assert_eq!(analysis.failure_patterns[0].category, FailureCategory::ImportError);
        assert!(analysis.suggested_actions.iter().any(|a| a.contains("dependencies")));
    }

    #[test]
    fn extracts_file_and_line() {
        let analyzer = TestAnalyzer::new();
        let results = vec![result("a", TestStatus::Failed, "", "File \"tests/foo.py\", line 42, in test_foo\nAssertionError: boom")];
        let analysis = analyzer.analyze(&results);
        let pattern = &analysis.failure_patterns[0];
        assert_eq!(pattern.file.as_deref(), Some("tests/foo.py"));
        assert_eq!(pattern.line, Some(42));
    }

    #[test]
    fn merges_repeated_patterns_and_sorts_by_count() {
        let analyzer = TestAnalyzer::new();
        let results = vec![
            result("a", TestStatus::Failed, "", "AssertionError: boom"),
            result("b", TestStatus::Failed, "", "AssertionError: boom"),
            result("c", TestStatus::Failed, "", "PermissionError: denied"),
        ];
        let analysis = analyzer.analyze(&results);
        assert_eq!(analysis.failure_patterns[0].count, 2);
        assert_eq!(analysis.failure_patterns[0].category, FailureCategory::AssertionError);
    }

    #[test]
    fn timeout_produces_dedicated_pattern() {
        let analyzer = TestAnalyzer::new();
        let results = vec![result("slow", TestStatus::Timeout, "", "")];
        let analysis = analyzer.analyze(&results);
        assert_eq!(analysis.failure_patterns[0].category, FailureCategory::Timeout);
        assert_eq!(analysis.estimated_fix_complexity, FixComplexity::Medium);
    }

    #[test]
    fn unknown_category_escalates_to_high_complexity() {
        let analyzer = TestAnalyzer::new();
        let results = vec![result("a", TestStatus::Failed, "", "something bizarre happened")];
        let analysis = analyzer.analyze(&results);
        assert_eq!(analysis.failure_patterns[0].category, FailureCategory::Unknown);
        assert_eq!(analysis.estimated_fix_complexity, FixComplexity::High);
    }

    #[test]
    fn many_distinct_categories_escalate_to_medium() {
        let analyzer = TestAnalyzer::new();
        let results = vec![
            result("a", TestStatus::Failed, "", "AssertionError: x"),
            result("b", TestStatus::Failed, "", "SyntaxError: invalid syntax"),
            result("c", TestStatus::Failed, "", "ImportError: no module"),
        ];
        let analysis = analyzer.analyze(&results);
        assert_eq!(analysis.estimated_fix_complexity, FixComplexity::Medium);
    }

    #[test]
    fn medium_baseline_with_many_categories_escalates_to_high() {
        let analyzer = TestAnalyzer::new();
        let results = vec![
            result("a", TestStatus::Timeout, "", ""),
            result("b", TestStatus::Failed, "", "PermissionError: denied"),
            result("c", TestStatus::Failed, "", "AssertionError: boom"),
        ];
        let analysis = analyzer.analyze(&results);
        assert_eq!(analysis.estimated_fix_complexity, FixComplexity::High);
    }

    #[test]
    fn medium_baseline_with_many_failures_escalates_to_high() {
        let analyzer = TestAnalyzer::new();
        let results: Vec<TestResult> = (0..6).map(|i| result(&format!("t{i}"), TestStatus::Failed, "", "PermissionError: denied")).collect();
        let analysis = analyzer.analyze(&results);
        assert_eq!(analysis.failure_patterns[0].count, 6);
        assert_eq!(analysis.estimated_fix_complexity, FixComplexity::High);
    }
}
