//! Domain logic for tfgate.
//!
//! This crate is intentionally I/O-free: it does assertions and policy.

use regex::Regex;
use std::collections::BTreeMap;
use tfgate_types::{
    CheckResult, CheckStatus, FatalError, TeardownRecord, TeardownStatus, Verdict, VerdictCounts,
    VerdictStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("invalid retryable error pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Compiled table of retryable error patterns.
#[derive(Debug, Clone)]
pub struct RetryMatcher {
    patterns: Vec<(Regex, String)>,
}

impl RetryMatcher {
    pub fn new(table: &BTreeMap<String, String>) -> Result<Self, DomainError> {
        let patterns = table
            .iter()
            .map(|(pattern, description)| {
                Regex::new(pattern)
                    .map(|re| (re, description.clone()))
                    .map_err(|e| DomainError::InvalidPattern {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Description of the first pattern matching `text`, if any.
    pub fn matches(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, description)| description.as_str())
    }
}

/// Soft assertion: the output value must be a non-empty string.
pub fn check_non_empty(output: &str, value: &str) -> CheckResult {
    if value.is_empty() {
        CheckResult {
            output: output.to_string(),
            status: CheckStatus::Fail,
            message: format!("{output} should not be empty"),
        }
    } else {
        CheckResult {
            output: output.to_string(),
            status: CheckStatus::Pass,
            message: format!("{output} is set"),
        }
    }
}

/// Evaluate every expected output that was retrieved.
///
/// All checks run; a failure never short-circuits the rest. Names absent
/// from `outputs` are skipped because a missing output is fatal upstream.
pub fn evaluate_outputs(
    expected: &[String],
    outputs: &BTreeMap<String, String>,
) -> Vec<CheckResult> {
    expected
        .iter()
        .filter_map(|name| outputs.get(name).map(|value| check_non_empty(name, value)))
        .collect()
}

pub fn count_checks(checks: &[CheckResult]) -> VerdictCounts {
    let mut counts = VerdictCounts::default();
    for check in checks {
        match check.status {
            CheckStatus::Pass => counts.pass += 1,
            CheckStatus::Fail => counts.fail += 1,
        }
    }
    counts
}

/// Combine checks, any fatal error and the teardown result into a verdict.
///
/// Reasons are ordered: fatal error, failed checks, teardown error.
pub fn compute_verdict(
    checks: &[CheckResult],
    fatal: Option<&FatalError>,
    teardown: &TeardownRecord,
) -> Verdict {
    let counts = count_checks(checks);
    let mut reasons = Vec::new();

    if let Some(fatal) = fatal {
        reasons.push(fatal.message.clone());
    }
    reasons.extend(
        checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .map(|c| c.message.clone()),
    );
    if teardown.status == TeardownStatus::Error {
        let detail = teardown.error.as_deref().unwrap_or("unknown error");
        reasons.push(format!("teardown failed: {detail}"));
    }

    let status = if reasons.is_empty() {
        VerdictStatus::Pass
    } else {
        VerdictStatus::Fail
    };

    Verdict {
        status,
        counts,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tfgate_types::{FatalKind, RetryPolicy};

    fn teardown_ok() -> TeardownRecord {
        TeardownRecord {
            attempted: true,
            status: TeardownStatus::Ok,
            error: None,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_value_fails_with_named_message() {
        let check = check_non_empty("server_id", "");
        assert_eq!(check.status, CheckStatus::Fail);
        assert_eq!(check.message, "server_id should not be empty");
    }

    #[test]
    fn whitespace_value_is_not_empty() {
        assert_eq!(check_non_empty("x", " ").status, CheckStatus::Pass);
    }

    #[test]
    fn all_checks_run_even_after_a_failure() {
        let expected = names(&["server_id", "server_endpoint", "user_details"]);
        let mut outputs = BTreeMap::new();
        outputs.insert("server_id".to_string(), String::new());
        outputs.insert("server_endpoint".to_string(), String::new());
        outputs.insert("user_details".to_string(), "[]".to_string());

        let checks = evaluate_outputs(&expected, &outputs);
        assert_eq!(checks.len(), 3);
        assert_eq!(count_checks(&checks), VerdictCounts { pass: 1, fail: 2 });

        let verdict = compute_verdict(&checks, None, &teardown_ok());
        assert_eq!(verdict.status, VerdictStatus::Fail);
        assert_eq!(
            verdict.reasons,
            vec![
                "server_id should not be empty".to_string(),
                "server_endpoint should not be empty".to_string(),
            ]
        );
    }

    #[test]
    fn checks_follow_expected_order() {
        let expected = names(&["b", "a"]);
        let outputs: BTreeMap<String, String> = [("a", "1"), ("b", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let checks = evaluate_outputs(&expected, &outputs);
        let order: Vec<&str> = checks.iter().map(|c| c.output.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn fatal_error_fails_verdict_first() {
        let fatal = FatalError {
            kind: FatalKind::MissingOutput,
            message: "output \"server_id\" not found".to_string(),
        };
        let teardown = TeardownRecord {
            attempted: true,
            status: TeardownStatus::Error,
            error: Some("destroy exploded".to_string()),
        };
        let verdict = compute_verdict(&[], Some(&fatal), &teardown);
        assert_eq!(verdict.status, VerdictStatus::Fail);
        assert_eq!(verdict.reasons[0], fatal.message);
        assert_eq!(verdict.reasons[1], "teardown failed: destroy exploded");
    }

    #[test]
    fn clean_run_passes() {
        let checks = vec![check_non_empty("server_id", "s-123")];
        let verdict = compute_verdict(&checks, None, &teardown_ok());
        assert_eq!(verdict.status, VerdictStatus::Pass);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn default_patterns_classify_transient_errors() {
        let matcher = RetryMatcher::new(&RetryPolicy::default().retryable_errors).unwrap();
        assert_eq!(
            matcher.matches("Error: Failed to query available provider packages\n"),
            Some("Failed to retrieve plugin due to transient network error.")
        );
        assert_eq!(
            matcher.matches("│ Error: Provider produced inconsistent result after apply"),
            Some("Provider eventual consistency error.")
        );
        assert_eq!(matcher.matches("Error: Invalid value for variable"), None);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let mut table = BTreeMap::new();
        table.insert("[oops".to_string(), "bad".to_string());
        assert!(matches!(
            RetryMatcher::new(&table),
            Err(DomainError::InvalidPattern { .. })
        ));
    }

    proptest! {
        /// Counts always add up to the number of evaluated checks.
        #[test]
        fn counts_sum_to_checks(values in proptest::collection::vec(proptest::option::of("[a-z]{0,4}"), 0..12)) {
            let expected: Vec<String> = (0..values.len()).map(|i| format!("out_{i}")).collect();
            let outputs: BTreeMap<String, String> = values
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.clone().map(|v| (format!("out_{i}"), v)))
                .collect();

            let checks = evaluate_outputs(&expected, &outputs);
            let counts = count_checks(&checks);
            prop_assert_eq!(checks.len(), outputs.len());
            prop_assert_eq!((counts.pass + counts.fail) as usize, checks.len());

            let empties = outputs.values().filter(|v| v.is_empty()).count();
            prop_assert_eq!(counts.fail as usize, empties);

            let verdict = compute_verdict(&checks, None, &teardown_ok());
            prop_assert_eq!(verdict.status == VerdictStatus::Pass, empties == 0);
        }
    }
}
