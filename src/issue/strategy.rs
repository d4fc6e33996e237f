use crate::issue::{CauseCategory, Effort, Issue, RepairStrategy, Solution, TestPlan};

struct Playbook {
    actions: &'static [&'static str],
    effort: Effort,
    risks: &'static [&'static str],
    verification: &'static [&'static str],
}

fn playbook(category: CauseCategory) -> Playbook {
    match category {
        CauseCategory::Timeout => Playbook {
            actions: &[
                "Measure how long the operation actually takes in the sandbox",
                "Raise the wait or request timeout for the affected step",
                "Replace fixed sleeps with an explicit readiness condition",
            ],
            effort: Effort::Low,
            risks: &["Longer timeouts slow down the suite and can hide real hangs"],
            verification: &["The step completes within the new limit on three consecutive runs"],
        },
        CauseCategory::NotFound => Playbook {
            actions: &[
                "Confirm the path, URL or selector still exists in the synced release",
                "Update the reference to the renamed or moved target",
            ],
            effort: Effort::Medium,
            risks: &["The target may have been removed on purpose upstream"],
            verification: &["The referenced resource resolves and the test reaches its assertion"],
        },
        CauseCategory::Permission => Playbook {
            actions: &[
                "Check the credentials and token scopes used by the failing step",
                "Fix file modes or ownership in the working tree",
            ],
            effort: Effort::Medium,
            risks: &["Widening permissions can expose more than the test needs"],
            verification: &["The step succeeds with the least privilege that works"],
        },
        CauseCategory::MissingDependency => Playbook {
            actions: &[
                "Install the missing package in the test environment",
                "Pin the dependency in the project's manifest",
            ],
            effort: Effort::Low,
            risks: &["A new dependency version can change behaviour elsewhere"],
            verification: &["A clean environment installs and imports the dependency"],
        },
        CauseCategory::UiBlocked => Playbook {
            actions: &[
                "Identify the element covering the target in a screenshot",
                "Dismiss or wait out the blocking overlay before interacting",
            ],
            effort: Effort::Medium,
            risks: &["Auto-dismissing dialogs can skip a state the user would see"],
            verification: &["The interaction succeeds and a screenshot shows the expected view"],
        },
        CauseCategory::Unknown => Playbook {
            actions: &[
                "Investigate manually: reproduce the failure with full logging",
                "Collect console logs and screenshots around the failing step",
            ],
            effort: Effort::High,
            risks: &["Root cause is unknown; any fix is speculative until reproduced"],
            verification: &["The failure is reproduced, explained and no longer occurs"],
        },
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Derive a repair plan for an issue. Pure and deterministic.
pub fn strategize(issue: &Issue) -> Solution {
    let book = playbook(issue.cause_category);

    let location_report = match &issue.source_test_id {
        Some(test) => format!("Failure surfaced by test `{test}` ({})", issue.cause_category),
        None => format!("Failure not tied to a specific test ({})", issue.cause_category),
    };

    let mut steps = Vec::new();
    if let Some(test) = &issue.source_test_id {
        steps.push(format!("Re-run `{test}` in the sandbox and confirm it fails as reported"));
    }
    steps.push("Apply the repair actions".to_string());
    match &issue.source_test_id {
        Some(test) => steps.push(format!("Re-run `{test}` and then the full suite")),
        None => steps.push("Re-run the full suite".to_string()),
    }

    Solution {
        issue_id: issue.id.clone(),
        location_report,
        repair_strategy: RepairStrategy {
            actions: to_strings(book.actions),
            effort: book.effort,
            risks: to_strings(book.risks),
        },
        test_plan: TestPlan {
            steps,
            verification_criteria: to_strings(book.verification),
        },
    }
}
