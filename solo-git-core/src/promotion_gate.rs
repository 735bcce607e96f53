//! Configurable rule-driven gate deciding whether a workpad may fast-forward
//! onto trunk (§4.4).

use serde::{Deserialize, Serialize};

use crate::model::PromotionDecisionType;

/// Tunable thresholds for one gate evaluation. Every field has a
/// conservative default matching the original's dataclass defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionRules {
    pub require_tests_passing: bool,
    pub require_tests_present: bool,
    pub require_fast_forward: bool,
    pub allow_merge_conflicts: bool,
    pub max_files_changed: Option<u32>,
    pub max_lines_changed: Option<u32>,
    pub require_coverage_threshold: Option<f64>,
    pub require_ai_review: bool,
}

impl Default for PromotionRules {
    fn default() -> Self {
        Self {
            require_tests_passing: true,
            require_tests_present: true,
            require_fast_forward: true,
            allow_merge_conflicts: false,
            max_files_changed: None,
            max_lines_changed: None,
            require_coverage_threshold: None,
            require_ai_review: false,
        }
    }
}

/// Everything the gate knew about a workpad at evaluation time.
#[derive(Debug, Clone)]
pub struct PromotionContext {
    pub tests_run: bool,
    pub tests_passed: bool,
    pub test_status: Option<String>,
    pub can_fast_forward: bool,
    pub files_changed: u32,
    pub lines_changed: u32,
    pub coverage_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub decision: PromotionDecisionType,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

impl PromotionDecision {
    fn approve() -> Self {
        Self { decision: PromotionDecisionType::Approve, reasons: Vec::new(), warnings: Vec::new() }
    }

    fn add_reason(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

pub struct PromotionGate {
    rules: PromotionRules,
}

impl PromotionGate {
    pub fn new(rules: PromotionRules) -> Self {
        Self { rules }
    }

    /// Evaluate `ctx` against the configured rules, in the same order the
    /// original checks them: tests, fast-forward, change-size caps, then the
    /// not-yet-implemented coverage/AI-review checks (recorded as warnings).
    pub fn evaluate(&self, ctx: &PromotionContext) -> PromotionDecision {
        let mut decision = PromotionDecision::approve();

        if self.rules.require_tests_present && !ctx.tests_run {
            decision.decision = PromotionDecisionType::Reject;
            decision.add_reason("no test run recorded for this workpad");
            return decision;
        }

        if self.rules.require_tests_passing && ctx.tests_run && !ctx.tests_passed {
            decision.decision = PromotionDecisionType::Reject;
            let status = ctx.test_status.as_deref().unwrap_or("red");
            decision.add_reason(format!("tests did not pass (status: {status})"));
            return decision;
        }

        if self.rules.require_fast_forward && !ctx.can_fast_forward {
            if self.rules.allow_merge_conflicts {
                decision.add_warning("trunk has diverged; promotion will require a merge, not a fast-forward");
            } else {
                decision.decision = PromotionDecisionType::Reject;
                decision.add_reason("workpad cannot fast-forward onto trunk");
                return decision;
            }
        }

        if let Some(max_files) = self.rules.max_files_changed {
            if ctx.files_changed > max_files {
                decision.decision = PromotionDecisionType::ManualReview;
                decision.add_reason(format!(
                    "changed {} files, exceeding the {max_files}-file review threshold",
                    ctx.files_changed
                ));
            }
        }

        if let Some(max_lines) = self.rules.max_lines_changed {
            if ctx.lines_changed > max_lines {
                decision.decision = PromotionDecisionType::ManualReview;
                decision.add_reason(format!(
                    "changed {} lines, exceeding the {max_lines}-line review threshold",
                    ctx.lines_changed
                ));
            }
        }

        if let Some(threshold) = self.rules.require_coverage_threshold {
            match ctx.coverage_percent {
                Some(actual) if actual < threshold => {
                    decision.add_warning(format!(
                        "coverage {actual:.1}% is below the {threshold:.1}% threshold (coverage is not yet enforced)"
                    ));
                }
                None => decision.add_warning("coverage threshold configured but no coverage data is available"),
                _ => {}
            }
        }

        if self.rules.require_ai_review {
            decision.add_warning("AI review is configured but not yet implemented");
        }

        if decision.reasons.is_empty() {
            decision.add_reason("all configured promotion rules passed");
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn green_context() -> PromotionContext {
        PromotionContext {
            tests_run: true,
            tests_passed: true,
            test_status: Some("green".to_string()),
            can_fast_forward: true,
            files_changed: 2,
            lines_changed: 20,
            coverage_percent: None,
        }
    }

    #[test]
    fn approves_clean_fast_forward() {
        let gate = PromotionGate::new(PromotionRules::default());
        let decision = gate.evaluate(&green_context());
        assert_eq!(decision.decision, PromotionDecisionType::Approve);
    }

    #[test]
    fn rejects_missing_test_run() {
        let gate = PromotionGate::new(PromotionRules::default());
        let mut ctx = green_context();
        ctx.tests_run = false;
        let decision = gate.evaluate(&ctx);
        assert_eq!(decision.decision, PromotionDecisionType::Reject);
    }

    #[test]
    fn rejects_failing_tests() {
        let gate = PromotionGate::new(PromotionRules::default());
        let mut ctx = green_context();
        ctx.tests_passed = false;
        ctx.test_status = Some("red".to_string());
        let decision = gate.evaluate(&ctx);
        assert_eq!(decision.decision, PromotionDecisionType::Reject);
        assert!(decision.reasons[0].contains("red"));
    }

    #[test]
    fn non_fast_forward_rejected_by_default() {
        let gate = PromotionGate::new(PromotionRules::default());
        let mut ctx = green_context();
        ctx.can_fast_forward = false;
        let decision = gate.evaluate(&ctx);
        assert_eq!(decision.decision, PromotionDecisionType::Reject);
    }

    #[test]
    fn non_fast_forward_downgrades_to_warning_when_conflicts_allowed() {
        let mut rules = PromotionRules::default();
        rules.allow_merge_conflicts = true;
        let gate = PromotionGate::new(rules);
        let mut ctx = green_context();
        ctx.can_fast_forward = false;
        let decision = gate.evaluate(&ctx);
        assert_eq!(decision.decision, PromotionDecisionType::Approve);
        assert_eq!(decision.warnings.len(), 1);
    }

    #[test]
    fn file_cap_triggers_manual_review_not_reject() {
        let mut rules = PromotionRules::default();
        rules.max_files_changed = Some(1);
        let gate = PromotionGate::new(rules);
        let decision = gate.evaluate(&green_context());
        assert_eq!(decision.decision, PromotionDecisionType::ManualReview);
    }

    #[test]
    fn line_cap_triggers_manual_review_not_reject() {
        let mut rules = PromotionRules::default();
        rules.max_lines_changed = Some(5);
        let gate = PromotionGate::new(rules);
        let decision = gate.evaluate(&green_context());
        assert_eq!(decision.decision, PromotionDecisionType::ManualReview);
    }

    #[test]
    fn coverage_below_threshold_only_warns() {
        let mut rules = PromotionRules::default();
        rules.require_coverage_threshold = Some(90.0);
        let gate = PromotionGate::new(rules);
        let mut ctx = green_context();
        ctx.coverage_percent = Some(50.0);
        let decision = gate.evaluate(&ctx);
        assert_eq!(decision.decision, PromotionDecisionType::Approve);
        assert!(!decision.warnings.is_empty());
    }
}
