//! Release gates: a fixed checklist evaluated against collected evidence.
//!
//! Checks are pure functions over [`GateEvidence`]; gathering the evidence is the
//! job of an [`EvidenceProvider`]. A failed rule is a normal result, not an error.

pub mod evidence;

use serde::{Deserialize, Serialize};

use crate::config::GateConfig;
use crate::runner::TestResult;

pub use evidence::{EvidenceProvider, FsEvidenceProvider};

/// Observations the gates are evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateEvidence {
    /// Screenshot file names.
    pub screenshots: Vec<String>,
    /// Console log lines.
    pub console_logs: Vec<String>,
    pub test_results: Vec<TestResult>,
    pub docs: PrerequisiteDocs,
}

/// Which release-prerequisite documents exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteDocs {
    pub problem_identification: bool,
    pub fix_strategy: bool,
    pub test_plan: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Conditions that must not hold.
    Forbidden,
    /// Steps that must have been performed.
    Required,
    /// Documents that must exist before release.
    Prerequisite,
}

struct Rule {
    id: &'static str,
    category: RuleCategory,
    /// True when the rule is satisfied.
    check: fn(&GateValidator, &GateEvidence) -> bool,
}

const RULES: &[Rule] = &[
    Rule {
        id: "no_real_env_verification",
        category: RuleCategory::Forbidden,
        check: |_, e| e.mentions_in_screenshots_or_tests("real_env"),
    },
    Rule {
        id: "code_analysis_only",
        category: RuleCategory::Forbidden,
        check: |_, e| {
            !e.test_results.is_empty() && !e.console_logs.is_empty() && !e.screenshots.is_empty()
        },
    },
    Rule {
        id: "untested_code",
        category: RuleCategory::Forbidden,
        check: |v, e| {
            e.test_results.len() >= v.config.min_test_results
                && v.covered_features(e).len() >= v.config.min_covered_features
        },
    },
    Rule {
        id: "sandbox_startup",
        category: RuleCategory::Required,
        check: |_, e| {
            e.console_logs.iter().any(|l| l.to_lowercase().contains("sandbox"))
                || e.screenshots.iter().any(|s| s.to_lowercase().contains("startup"))
        },
    },
    Rule {
        id: "complete_workflow",
        category: RuleCategory::Required,
        check: |v, e| e.screenshots.len() >= v.config.min_screenshots,
    },
    Rule {
        id: "focus_feature_rendering",
        category: RuleCategory::Required,
        check: |v, e| e.mentions_in_screenshots_or_tests(&v.config.focus_feature),
    },
    Rule {
        id: "console_logs",
        category: RuleCategory::Required,
        check: |_, e| !e.console_logs.is_empty(),
    },
    Rule {
        id: "actual_results",
        category: RuleCategory::Required,
        check: |_, e| !e.test_results.is_empty(),
    },
    Rule {
        id: "problem_identification",
        category: RuleCategory::Prerequisite,
        check: |_, e| e.docs.problem_identification,
    },
    Rule {
        id: "fix_strategy",
        category: RuleCategory::Prerequisite,
        check: |_, e| e.docs.fix_strategy,
    },
    Rule {
        id: "test_plan",
        category: RuleCategory::Prerequisite,
        check: |_, e| e.docs.test_plan,
    },
];

impl GateEvidence {
    fn mentions_in_screenshots_or_tests(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.screenshots.iter().any(|s| s.to_lowercase().contains(&keyword))
            || self
                .test_results
                .iter()
                .any(|t| t.name.to_lowercase().contains(&keyword))
    }
}

/// Outcome of one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub id: String,
    pub category: RuleCategory,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateReport {
    pub all_passed: bool,
    pub passed: Vec<String>,
    pub failed: Vec<String>,
    pub warnings: Vec<String>,
    pub rules: Vec<RuleOutcome>,
}

impl GateReport {
    fn failed_where(&self, keep: impl Fn(RuleCategory) -> bool) -> Vec<String> {
        self.rules
            .iter()
            .filter(|r| !r.passed && keep(r.category))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Failed rules that stop a run before its tests.
    pub fn blocking_failures(&self) -> Vec<String> {
        self.failed_where(|c| c != RuleCategory::Prerequisite)
    }

    /// Failed document rules; the run itself produces these documents, so they are
    /// only enforced before publishing.
    pub fn prerequisite_failures(&self) -> Vec<String> {
        self.failed_where(|c| c == RuleCategory::Prerequisite)
    }
}

pub struct GateValidator {
    config: GateConfig,
}

impl GateValidator {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Core features named by at least one test.
    fn covered_features<'a>(&'a self, evidence: &GateEvidence) -> Vec<&'a str> {
        let names: Vec<String> = evidence
            .test_results
            .iter()
            .map(|t| t.name.to_lowercase())
            .collect();
        self.config
            .core_features
            .iter()
            .filter(|f| {
                let f = f.to_lowercase();
                names.iter().any(|n| n.contains(&f))
            })
            .map(String::as_str)
            .collect()
    }

    pub fn verify_all(&self, evidence: &GateEvidence) -> GateReport {
        let rules: Vec<RuleOutcome> = RULES
            .iter()
            .map(|rule| RuleOutcome {
                id: rule.id.to_string(),
                category: rule.category,
                passed: (rule.check)(self, evidence),
            })
            .collect();

        let (passed, failed): (Vec<_>, Vec<_>) = rules.iter().partition(|r| r.passed);
        let passed: Vec<String> = passed.into_iter().map(|r| r.id.clone()).collect();
        let failed: Vec<String> = failed.into_iter().map(|r| r.id.clone()).collect();

        GateReport {
            all_passed: failed.is_empty(),
            passed,
            failed,
            warnings: self.warnings(evidence),
            rules,
        }
    }

    fn warnings(&self, evidence: &GateEvidence) -> Vec<String> {
        let mut warnings = Vec::new();

        let results = &evidence.test_results;
        if results.len() > 1 && results.iter().all(|t| t.passed == results[0].passed) {
            let outcome = if results[0].passed { "passed" } else { "failed" };
            warnings.push(format!(
                "all {} test results {outcome}; results may be canned",
                results.len()
            ));
        }

        let error_lines = evidence
            .console_logs
            .iter()
            .filter(|l| l.to_lowercase().contains("error"))
            .count();
        if error_lines > 0 {
            warnings.push(format!("{error_lines} console log line(s) mention errors"));
        }

        if evidence.screenshots.len() == self.config.min_screenshots {
            warnings.push(format!(
                "screenshot count is exactly the minimum ({})",
                self.config.min_screenshots
            ));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::complete_evidence;

    fn validator() -> GateValidator {
        GateValidator::new(GateConfig::default())
    }

    #[test]
    fn complete_evidence_passes_every_rule() {
        let report = validator().verify_all(&complete_evidence());
        assert!(report.all_passed, "failed: {:?}", report.failed);
        assert_eq!(report.passed.len(), RULES.len());
        assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);
    }

    #[test]
    fn sparse_evidence_fails_screenshots_and_docs() {
        let evidence = GateEvidence {
            screenshots: vec!["a.png".to_string(), "b.png".to_string()],
            console_logs: Vec::new(),
            test_results: Vec::new(),
            docs: PrerequisiteDocs::default(),
        };
        let report = validator().verify_all(&evidence);

        assert!(!report.all_passed);
        for id in ["complete_workflow", "problem_identification", "fix_strategy", "test_plan"] {
            assert!(report.failed.iter().any(|f| f == id), "{id} should fail");
        }
    }

    #[test]
    fn missing_documents_do_not_block_before_tests() {
        let mut evidence = complete_evidence();
        evidence.docs = PrerequisiteDocs::default();
        let report = validator().verify_all(&evidence);

        assert!(!report.all_passed);
        assert!(report.blocking_failures().is_empty());
        assert_eq!(
            report.prerequisite_failures(),
            ["problem_identification", "fix_strategy", "test_plan"]
        );
    }

    #[test]
    fn verify_all_is_deterministic() {
        let evidence = GateEvidence {
            screenshots: vec!["startup.png".to_string()],
            console_logs: vec!["Error: boom".to_string()],
            test_results: vec![TestResult::pass("navigation")],
            docs: PrerequisiteDocs {
                problem_identification: true,
                ..Default::default()
            },
        };
        let v = validator();
        assert_eq!(v.verify_all(&evidence), v.verify_all(&evidence));
    }

    #[test]
    fn untested_code_needs_feature_coverage() {
        let mut evidence = complete_evidence();
        evidence.test_results = vec![
            TestResult::pass("login_1"),
            TestResult::pass("login_2"),
            TestResult::fail("login_3", "x"),
        ];
        let report = validator().verify_all(&evidence);
        assert!(report.failed.iter().any(|f| f == "untested_code"));
    }

    #[test]
    fn focus_feature_follows_config() {
        let config = GateConfig {
            focus_feature: "timeline".to_string(),
            ..GateConfig::default()
        };
        let report = GateValidator::new(config).verify_all(&complete_evidence());
        assert!(report.failed.iter().any(|f| f == "focus_feature_rendering"));
    }

    #[test]
    fn warnings_do_not_affect_verdict() {
        let mut evidence = complete_evidence();
        evidence.screenshots.truncate(5);
        evidence.console_logs.push("TypeError: x is undefined".to_string());
        for t in &mut evidence.test_results {
            t.passed = true;
        }

        let report = validator().verify_all(&evidence);
        assert!(report.all_passed, "failed: {:?}", report.failed);
        assert_eq!(report.warnings.len(), 3);
    }
}
