//! Markdown documents consumed by the release-prerequisite gates.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fsutil::write_atomic;
use crate::gate::evidence::{FIX_STRATEGY_DOC, PROBLEM_IDENTIFICATION_DOC, TEST_PLAN_DOC};
use crate::issue::{Issue, Solution};
use crate::runner::TestResult;

pub const README: &str = "README.md";
pub const RESULTS_HEADING: &str = "## Test results";
pub const ISSUES_HEADING: &str = "## Known issues";

fn problem_identification(issues: &[Issue]) -> String {
    let mut doc = String::from("# Problem identification\n\n");
    for issue in issues {
        let _ = writeln!(doc, "## {} {}\n", issue.id, issue.title);
        let _ = writeln!(doc, "- Category: {}", issue.cause_category);
        let _ = writeln!(doc, "- Severity: {:?}", issue.severity);
        let _ = writeln!(doc, "- Confidence: {:.2}", issue.confidence);
        if let Some(test) = &issue.source_test_id {
            let _ = writeln!(doc, "- Test: `{test}`");
        }
        let _ = writeln!(doc, "\n```\n{}\n```\n", issue.description.trim_end());
    }
    doc
}

fn fix_strategy(solutions: &[Solution]) -> String {
    let mut doc = String::from("# Fix strategy\n\n");
    for s in solutions {
        let _ = writeln!(doc, "## {}\n\n{}\n", s.issue_id, s.location_report);
        let _ = writeln!(doc, "Effort: {:?}\n", s.repair_strategy.effort);
        for action in &s.repair_strategy.actions {
            let _ = writeln!(doc, "1. {action}");
        }
        doc.push_str("\nRisks:\n\n");
        for risk in &s.repair_strategy.risks {
            let _ = writeln!(doc, "- {risk}");
        }
        doc.push('\n');
    }
    doc
}

fn test_plan(solutions: &[Solution]) -> String {
    let mut doc = String::from("# Test plan\n\n");
    for s in solutions {
        let _ = writeln!(doc, "## {}\n", s.issue_id);
        for step in &s.test_plan.steps {
            let _ = writeln!(doc, "1. {step}");
        }
        doc.push_str("\nVerified when:\n\n");
        for c in &s.test_plan.verification_criteria {
            let _ = writeln!(doc, "- {c}");
        }
        doc.push('\n');
    }
    doc
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

fn results_section(results: &[TestResult]) -> String {
    if results.is_empty() {
        return "No test results.".to_string();
    }
    let passed = results.iter().filter(|r| r.passed).count();
    let mut body = format!("{passed} of {} tests passed.\n\n", results.len());
    body.push_str("| Test | Status | Details |\n| --- | --- | --- |\n");
    for r in results {
        let status = if r.passed { "passed" } else { "failed" };
        let details = r.error.as_deref().map(first_line).unwrap_or_default().replace('|', "\\|");
        let _ = writeln!(body, "| {} | {status} | {details} |", r.name);
    }
    body
}

fn issues_section(issues: &[Issue]) -> String {
    if issues.is_empty() {
        return "No known issues.".to_string();
    }
    let mut body = format!("{} open issue(s):\n", issues.len());
    for issue in issues {
        let _ = writeln!(body, "\n### {} {}\n", issue.id, issue.title);
        let _ = writeln!(body, "- Category: {}", issue.cause_category);
        let _ = writeln!(body, "- Severity: {:?}", issue.severity);
        if let Some(test) = &issue.source_test_id {
            let _ = writeln!(body, "- Test: `{test}`");
        }
        let _ = writeln!(body, "- Details: {}", first_line(&issue.description));
    }
    body
}

/// Replace the `heading` section of a markdown document, or append it.
///
/// A section runs until the next level-two heading.
fn replace_section(doc: &str, heading: &str, body: &str) -> String {
    let section = format!("{heading}\n\n{}\n", body.trim_end());
    let lines: Vec<&str> = doc.lines().collect();

    let Some(start) = lines.iter().position(|l| l.trim_end() == heading) else {
        let mut out = doc.trim_end().to_string();
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&section);
        return out;
    };
    let end = lines[start + 1..]
        .iter()
        .position(|l| l.starts_with("## "))
        .map_or(lines.len(), |i| start + 1 + i);

    let mut out = String::new();
    for line in &lines[..start] {
        let _ = writeln!(out, "{line}");
    }
    out.push_str(&section);
    if end < lines.len() {
        out.push('\n');
        for line in &lines[end..] {
            let _ = writeln!(out, "{line}");
        }
    }
    out
}

/// `readme` with its test results and known issues sections brought up to date.
///
/// Output depends only on the inputs, so an unchanged run leaves the file unchanged.
pub fn readme_with_results(readme: &str, results: &[TestResult], issues: &[Issue]) -> String {
    let doc = replace_section(readme, RESULTS_HEADING, &results_section(results));
    replace_section(&doc, ISSUES_HEADING, &issues_section(issues))
}

/// Write the three prerequisite documents into `dir`; returns their paths.
pub async fn write_documents(dir: &Path, issues: &[Issue], solutions: &[Solution]) -> Result<Vec<PathBuf>> {
    let docs = [
        (PROBLEM_IDENTIFICATION_DOC, problem_identification(issues)),
        (FIX_STRATEGY_DOC, fix_strategy(solutions)),
        (TEST_PLAN_DOC, test_plan(solutions)),
    ];

    let mut paths = Vec::with_capacity(docs.len());
    for (name, contents) in docs {
        let path = dir.join(name);
        write_atomic(&path, contents.as_bytes()).await?;
        paths.push(path);
    }
    tracing::info!(dir = %dir.display(), issues = issues.len(), "Wrote issue documents");
    Ok(paths)
}

/// Prerequisite documents for a run whose tests raised nothing.
pub async fn write_clean_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    let docs = [
        (PROBLEM_IDENTIFICATION_DOC, "# Problem identification\n\nNo failing tests.\n"),
        (FIX_STRATEGY_DOC, "# Fix strategy\n\nNothing to fix.\n"),
        (TEST_PLAN_DOC, "# Test plan\n\nRe-run the full suite on the next release.\n"),
    ];

    let mut paths = Vec::with_capacity(docs.len());
    for (name, contents) in docs {
        let path = dir.join(name);
        write_atomic(&path, contents.as_bytes()).await?;
        paths.push(path);
    }
    tracing::info!(dir = %dir.display(), "Wrote clean-run documents");
    Ok(paths)
}
