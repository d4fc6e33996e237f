//! First-match-wins classification of failures into cause categories.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::issue::{CauseCategory, Issue, RawFailure, Severity};

/// Matchers in evaluation order. Order is significant: the first hit wins.
/// Anything left over is `Unknown`.
static MATCHERS: Lazy<Vec<(CauseCategory, Regex)>> = Lazy::new(|| {
    [
        (
            CauseCategory::Timeout,
            r"\btime[sd]?[\s_-]?outs?(?:\b|exception|error)|etimedout|deadline exceeded|took too long",
        ),
        (
            CauseCategory::NotFound,
            r"not found|\b404\b|no such file|does not exist|enoent|no such element|nosuchelement|filenotfound",
        ),
        (
            CauseCategory::Permission,
            r"permission denied|access denied|forbidden|\b40[13]\b|unauthori[sz]ed|not permitted|eacces|permissionerror|errno 13\b",
        ),
        (
            CauseCategory::MissingDependency,
            r"no module named|modulenotfounderror|cannot find module|missing dependency|not installed|unresolved import|could not resolve|importerror",
        ),
        (
            CauseCategory::UiBlocked,
            r"not clickable|intercepted|obscured|overlay|not interactable|not visible|modal|blocked",
        ),
    ]
    .into_iter()
    .map(|(category, pattern)| (category, Regex::new(pattern).unwrap()))
    .collect()
});

fn category_for(haystack: &str) -> CauseCategory {
    MATCHERS
        .iter()
        .find(|(_, re)| re.is_match(haystack))
        .map(|(category, _)| *category)
        .unwrap_or(CauseCategory::Unknown)
}

fn base_severity(category: CauseCategory) -> Severity {
    match category {
        CauseCategory::Permission | CauseCategory::MissingDependency => Severity::High,
        CauseCategory::Timeout | CauseCategory::NotFound | CauseCategory::Unknown => {
            Severity::Medium
        }
        CauseCategory::UiBlocked => Severity::Low,
    }
}

fn confidence(category: CauseCategory) -> f32 {
    match category {
        CauseCategory::Timeout | CauseCategory::Permission => 0.9,
        CauseCategory::NotFound | CauseCategory::MissingDependency => 0.8,
        CauseCategory::UiBlocked => 0.6,
        CauseCategory::Unknown => 0.2,
    }
}

/// Stable id derived from the failure's content.
fn issue_id(failure: &RawFailure) -> String {
    let mut hasher = Sha256::new();
    hasher.update(failure.test_name.as_deref().unwrap_or_default());
    hasher.update([0u8]);
    hasher.update(&failure.message);
    hasher.update([0u8]);
    hasher.update(&failure.description);
    let digest = hex::encode(hasher.finalize());
    format!("ISSUE-{}", &digest[..12])
}

fn title(failure: &RawFailure, category: CauseCategory) -> String {
    let first_line = failure.message.lines().next().unwrap_or_default().trim();
    let summary: String = if first_line.is_empty() {
        category.as_str().replace('_', " ")
    } else {
        first_line.chars().take(80).collect()
    };
    match &failure.test_name {
        Some(test) => format!("{test}: {summary}"),
        None => summary,
    }
}

/// Classify a failure. Total: every input yields an issue with a category.
pub fn classify(failure: &RawFailure) -> Issue {
    let haystack = format!("{}\n{}", failure.message, failure.description).to_lowercase();
    let cause_category = category_for(&haystack);

    let critical = failure
        .test_name
        .as_deref()
        .is_some_and(|t| t.to_lowercase().contains("critical"));
    let severity = if critical {
        Severity::High
    } else {
        base_severity(cause_category)
    };

    let description = if failure.description.trim().is_empty() {
        failure.message.clone()
    } else {
        format!("{}\n\n{}", failure.message, failure.description)
    };

    Issue {
        id: issue_id(failure),
        title: title(failure, cause_category),
        description,
        severity,
        cause_category,
        source_test_id: failure.test_name.clone(),
        confidence: confidence(cause_category),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(message: &str) -> RawFailure {
        RawFailure {
            message: message.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn classify_connection_timeout() {
        let issue = classify(&failure("Connection timeout after 30 seconds"));
        assert_eq!(issue.cause_category, CauseCategory::Timeout);
        assert_eq!(issue.severity, Severity::Medium);
    }

    #[test]
    fn classify_each_category() {
        let cases = [
            ("Request timed out", CauseCategory::Timeout),
            ("GET /api/tasks returned 404", CauseCategory::NotFound),
            ("open config.json: No such file or directory", CauseCategory::NotFound),
            ("Permission denied (publickey)", CauseCategory::Permission),
            ("ModuleNotFoundError: No module named 'selenium'", CauseCategory::MissingDependency),
            ("Element is not clickable at point (10, 20)", CauseCategory::UiBlocked),
            ("assertion failed: left == right", CauseCategory::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(classify(&failure(message)).cause_category, expected, "{message}");
        }
    }

    #[test]
    fn exception_names_without_prose_are_classified() {
        let cases = [
            ("selenium.common.exceptions.TimeoutException: Message:", CauseCategory::Timeout),
            ("asyncio.TimeoutError", CauseCategory::Timeout),
            ("connect ETIMEDOUT 10.0.0.7:443", CauseCategory::Timeout),
            ("3 timeouts while waiting for the canvas", CauseCategory::Timeout),
            ("NoSuchElementException: #mindmap-root", CauseCategory::NotFound),
            ("FileNotFoundError: 'fixtures/session.json'", CauseCategory::NotFound),
            ("PermissionError: [Errno 13] '/var/log/app'", CauseCategory::Permission),
            ("OSError: [Errno 13]", CauseCategory::Permission),
            ("ModuleNotFoundError: pyautogui", CauseCategory::MissingDependency),
        ];
        for (message, expected) in cases {
            assert_eq!(classify(&failure(message)).cause_category, expected, "{message}");
        }
    }

    #[test]
    fn time_followed_by_other_words_is_not_a_timeout() {
        for message in ["print the time output", "sometimes outdated", "Errno 130"] {
            assert_ne!(classify(&failure(message)).cause_category, CauseCategory::Timeout, "{message}");
        }
        assert_ne!(classify(&failure("Errno 130")).cause_category, CauseCategory::Permission);
    }

    #[test]
    fn earlier_category_wins() {
        // Both timeout and not-found match; timeout is checked first.
        let issue = classify(&failure("element not found: wait timed out"));
        assert_eq!(issue.cause_category, CauseCategory::Timeout);
    }

    #[test]
    fn description_is_searched_too() {
        let f = RawFailure {
            test_name: None,
            message: "step failed".to_string(),
            description: "caused by: Access Denied".to_string(),
        };
        assert_eq!(classify(&f).cause_category, CauseCategory::Permission);
    }

    #[test]
    fn unknown_has_lowest_confidence() {
        let unknown = classify(&failure("")).confidence;
        for (category, _) in MATCHERS.iter() {
            assert!(confidence(*category) > unknown);
        }
    }

    #[test]
    fn classify_is_total_and_deterministic() {
        let long = "x".repeat(10_000);
        let inputs = ["", "   ", "\n\n", "日本語のエラー", "TIMEOUT", long.as_str()];
        for input in inputs {
            let a = classify(&failure(input));
            let b = classify(&failure(input));
            assert_eq!(a, b);
            assert!(!a.cause_category.as_str().is_empty());
            assert!(a.id.starts_with("ISSUE-"));
        }
    }

    #[test]
    fn critical_test_name_raises_severity() {
        let f = RawFailure {
            test_name: Some("critical_path_recording".to_string()),
            message: "element is obscured by overlay".to_string(),
            description: String::new(),
        };
        let issue = classify(&f);
        assert_eq!(issue.cause_category, CauseCategory::UiBlocked);
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.source_test_id.as_deref(), Some("critical_path_recording"));
        assert!(issue.title.starts_with("critical_path_recording: "));
    }
}
