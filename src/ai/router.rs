//! Skill router.
//!
//! Classifies a free-text query to one of the six skills by ordered keyword
//! rules. Evaluation order is the priority order, so the first matching rule
//! wins and ties are impossible. Deterministic, no network calls.

use once_cell::sync::Lazy;
use regex::Regex;

use super::skills::Skill;

/// `why ... fail` with anything in between, e.g. "why did the import fail".
static WHY_FAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"why\b.*\bfail").unwrap());

const PERFORMANCE_KEYWORDS: &[&str] =
    &["slow", "latency", "duration", "timeout", "bottleneck", "optimize", "tuning"];
const ROOT_CAUSE_KEYWORDS: &[&str] = &["root cause", "correlat", "cascading", "spike"];
const ERROR_KEYWORDS: &[&str] = &["error", "arerr", "exception", "failed", "stack trace"];
const ANOMALY_KEYWORDS: &[&str] = &["anomal", "unusual", "unexpected", "deviation", "outlier"];
const SUMMARY_KEYWORDS: &[&str] = &["summar", "overview", "executive", "brief", "report"];

/// Resolve the skill for a query. A forced skill is returned unchanged.
pub fn route(query: &str, forced: Option<Skill>) -> Skill {
    if let Some(skill) = forced {
        return skill;
    }

    let lowered = query.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    if contains_any(PERFORMANCE_KEYWORDS) {
        Skill::Performance
    } else if contains_any(ROOT_CAUSE_KEYWORDS) || WHY_FAIL.is_match(&lowered) {
        Skill::RootCause
    } else if contains_any(ERROR_KEYWORDS) {
        Skill::ErrorExplainer
    } else if contains_any(ANOMALY_KEYWORDS) {
        Skill::Anomaly
    } else if contains_any(SUMMARY_KEYWORDS) {
        Skill::Summarizer
    } else {
        Skill::NlQuery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_performance_queries() {
        assert_eq!(route("Why is my system slow?", None), Skill::Performance);
        assert_eq!(route("find the BOTTLENECK", None), Skill::Performance);
    }

    #[test]
    fn routes_root_cause_queries() {
        assert_eq!(route("what is the root cause here", None), Skill::RootCause);
        assert_eq!(route("why did the import fail", None), Skill::RootCause);
        assert_eq!(route("correlate these spikes", None), Skill::RootCause);
    }

    #[test]
    fn routes_error_queries() {
        assert_eq!(route("explain ARERR 302", None), Skill::ErrorExplainer);
        assert_eq!(route("show me the stack trace", None), Skill::ErrorExplainer);
    }

    #[test]
    fn routes_anomaly_and_summary() {
        assert_eq!(route("any unusual activity?", None), Skill::Anomaly);
        assert_eq!(route("Give me an executive overview", None), Skill::Summarizer);
    }

    #[test]
    fn falls_back_to_nl_query() {
        assert_eq!(route("random musings about the moon", None), Skill::NlQuery);
    }

    #[test]
    fn forced_skill_always_wins() {
        assert_eq!(route("Why is my system slow?", Some(Skill::Anomaly)), Skill::Anomaly);
    }

    #[test]
    fn higher_priority_rule_wins_on_overlap() {
        // "slow" (performance) outranks "error" (error_explainer).
        assert_eq!(route("slow queries causing errors", None), Skill::Performance);
    }
}
