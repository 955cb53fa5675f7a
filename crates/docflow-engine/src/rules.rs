//! Rule evaluator: maps a metrics snapshot and an ordered rule list to an action.
//!
//! Rules are checked in list order and the first match wins. A rule whose
//! `combine_with_next` is set is joined with the rule after it into one
//! compound condition; within such a chain `AND` binds tighter than `OR`
//! (`a AND b OR c` reads `(a AND b) OR c`). A chain takes the action of its
//! first rule.

use std::collections::BTreeMap;

use docflow_types::{ActionId, ActionRule, Combinator, RuleMetric, RuleOperator, StructuredResult};

// ---------------------------------------------------------------------------
// MetricSnapshot
// ---------------------------------------------------------------------------

/// The metric values a rule can refer to. Optional metrics that the service
/// did not report are `None`, and a rule on a missing metric never matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshot {
    pub severity_score: f64,
    pub violations_count: Option<f64>,
    pub confidence: Option<f64>,
    pub document_category: Option<String>,
    pub risk_types: Option<Vec<String>>,
    pub has_blocking_issue: bool,
    pub boolean_checks: BTreeMap<String, bool>,
}

impl MetricSnapshot {
    pub fn from_result(result: &StructuredResult) -> Self {
        let analysis = &result.ai_analysis;
        let profile = result.document_profile.as_ref();
        Self {
            severity_score: analysis.severity_score,
            violations_count: analysis.violations_count,
            confidence: profile.map(|p| p.confidence),
            document_category: profile.map(|p| p.category.clone()),
            risk_types: profile.map(|p| p.risk_types.clone()),
            has_blocking_issue: result.has_blocking_issue(),
            boolean_checks: analysis.boolean_checks.clone(),
        }
    }

    pub fn with_severity(severity_score: f64) -> Self {
        Self {
            severity_score,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Single-rule matching
// ---------------------------------------------------------------------------

fn compare_number(actual: f64, op: RuleOperator, threshold: f64) -> bool {
    match op {
        RuleOperator::Gt => actual > threshold,
        RuleOperator::Lt => actual < threshold,
        RuleOperator::Gte => actual >= threshold,
        RuleOperator::Lte => actual <= threshold,
        RuleOperator::Eq => actual == threshold,
        RuleOperator::Neq => actual != threshold,
        RuleOperator::IsTrue | RuleOperator::IsFalse => false,
    }
}

fn compare_flag(actual: bool, op: RuleOperator) -> bool {
    match op {
        RuleOperator::IsTrue => actual,
        RuleOperator::IsFalse => !actual,
        _ => false,
    }
}

/// Whether one rule's condition holds, ignoring its combinator.
pub fn rule_matches(rule: &ActionRule, snapshot: &MetricSnapshot) -> bool {
    let number = |actual: Option<f64>| match (actual, rule.threshold_number) {
        (Some(actual), Some(threshold)) => compare_number(actual, rule.operator, threshold),
        _ => false,
    };

    match rule.metric {
        RuleMetric::SeverityScore => number(Some(snapshot.severity_score)),
        RuleMetric::ViolationsCount => number(snapshot.violations_count),
        RuleMetric::Confidence => number(snapshot.confidence),
        RuleMetric::DocumentCategory => {
            match (&snapshot.document_category, &rule.threshold_string) {
                (Some(actual), Some(expected)) => match rule.operator {
                    RuleOperator::Eq => actual == expected,
                    RuleOperator::Neq => actual != expected,
                    _ => false,
                },
                _ => false,
            }
        }
        RuleMetric::RiskTypePresent => match (&snapshot.risk_types, &rule.threshold_string) {
            (Some(risks), Some(expected)) => {
                let present = risks.iter().any(|r| r == expected);
                match rule.operator {
                    RuleOperator::Eq => present,
                    RuleOperator::Neq => !present,
                    _ => false,
                }
            }
            _ => false,
        },
        RuleMetric::HasBlockingIssue => compare_flag(snapshot.has_blocking_issue, rule.operator),
        RuleMetric::BooleanCheck => rule
            .boolean_check_key
            .as_deref()
            .and_then(|key| snapshot.boolean_checks.get(key))
            .is_some_and(|&value| compare_flag(value, rule.operator)),
    }
}

// ---------------------------------------------------------------------------
// Chains
// ---------------------------------------------------------------------------

/// Split the rule list into chains of rules joined by `combine_with_next`.
/// A combinator on the last rule has nothing to join and is ignored.
fn chains(rules: &[ActionRule]) -> Vec<&[ActionRule]> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, rule) in rules.iter().enumerate() {
        let last = i + 1 == rules.len();
        if rule.combine_with_next.is_none() || last {
            out.push(&rules[start..=i]);
            start = i + 1;
        }
    }
    out
}

fn chain_matches(chain: &[ActionRule], snapshot: &MetricSnapshot) -> bool {
    // OR of AND-runs.
    let mut run_holds = true;
    for (i, rule) in chain.iter().enumerate() {
        run_holds = run_holds && rule_matches(rule, snapshot);
        let is_last = i + 1 == chain.len();
        if is_last || rule.combine_with_next == Some(Combinator::Or) {
            if run_holds {
                return true;
            }
            run_holds = true;
        }
    }
    false
}

/// The first rule of the first matching chain, if any.
pub fn matching_rule<'a>(snapshot: &MetricSnapshot, rules: &'a [ActionRule]) -> Option<&'a ActionRule> {
    chains(rules)
        .into_iter()
        .find(|chain| chain_matches(chain, snapshot))
        .and_then(|chain| chain.first())
}

/// Evaluate `rules` in order against `snapshot`; `default` when none match.
pub fn evaluate_rules(snapshot: &MetricSnapshot, rules: &[ActionRule], default: ActionId) -> ActionId {
    match matching_rule(snapshot, rules) {
        Some(rule) => {
            tracing::debug!(
                rule = rule.id.as_deref().unwrap_or("-"),
                metric = ?rule.metric,
                op = rule.operator.symbol(),
                action = %rule.action_id,
                "Action rule matched"
            );
            rule.action_id
        }
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_types::{Analysis, DocumentProfile, ExecutionCommand, Finding, ResponseStatus};

    fn severity_rule(op: RuleOperator, threshold: f64, action: ActionId) -> ActionRule {
        ActionRule::numeric(RuleMetric::SeverityScore, op, threshold, action)
    }

    #[test]
    fn first_match_wins() {
        let rules = vec![
            severity_rule(RuleOperator::Gte, 7.0, ActionId::ReturnToAuthor),
            severity_rule(RuleOperator::Gte, 4.0, ActionId::Escalate),
        ];
        let snap = MetricSnapshot::with_severity(8.0);
        assert_eq!(
            evaluate_rules(&snap, &rules, ActionId::ContinueProcess),
            ActionId::ReturnToAuthor
        );
        let snap = MetricSnapshot::with_severity(5.0);
        assert_eq!(
            evaluate_rules(&snap, &rules, ActionId::ContinueProcess),
            ActionId::Escalate
        );
    }

    #[test]
    fn no_match_returns_default() {
        let rules = vec![severity_rule(RuleOperator::Gte, 7.0, ActionId::ReturnToAuthor)];
        let snap = MetricSnapshot::with_severity(3.0);
        assert_eq!(
            evaluate_rules(&snap, &rules, ActionId::ContinueProcess),
            ActionId::ContinueProcess
        );
        assert_eq!(evaluate_rules(&snap, &[], ActionId::SkipNode), ActionId::SkipNode);
    }

    #[test]
    fn numeric_operators() {
        let snap = MetricSnapshot::with_severity(5.0);
        let cases = [
            (RuleOperator::Gt, 5.0, false),
            (RuleOperator::Gt, 4.9, true),
            (RuleOperator::Lt, 5.1, true),
            (RuleOperator::Gte, 5.0, true),
            (RuleOperator::Lte, 5.0, true),
            (RuleOperator::Lte, 4.0, false),
            (RuleOperator::Eq, 5.0, true),
            (RuleOperator::Eq, 5.5, false),
        ];
        for (op, threshold, expected) in cases {
            let rule = severity_rule(op, threshold, ActionId::Escalate);
            assert_eq!(rule_matches(&rule, &snap), expected, "{op:?} {threshold}");
        }
    }

    #[test]
    fn missing_optional_metric_never_matches() {
        let snap = MetricSnapshot::with_severity(5.0);
        let rule = ActionRule::numeric(
            RuleMetric::ViolationsCount,
            RuleOperator::Lt,
            100.0,
            ActionId::Escalate,
        );
        assert!(!rule_matches(&rule, &snap));
        let rule = ActionRule::categorical(
            RuleMetric::DocumentCategory,
            RuleOperator::Neq,
            "invoice",
            ActionId::Escalate,
        );
        assert!(!rule_matches(&rule, &snap));
    }

    #[test]
    fn missing_profile_never_matches_risk_rules() {
        let snap = MetricSnapshot::with_severity(5.0);
        for op in [RuleOperator::Eq, RuleOperator::Neq] {
            let rule = ActionRule::categorical(
                RuleMetric::RiskTypePresent,
                op,
                "financial",
                ActionId::Escalate,
            );
            assert!(!rule_matches(&rule, &snap), "{op:?}");
        }

        // A reported but empty risk list is a real value.
        let snap = MetricSnapshot {
            risk_types: Some(Vec::new()),
            ..MetricSnapshot::default()
        };
        let rule = ActionRule::categorical(
            RuleMetric::RiskTypePresent,
            RuleOperator::Neq,
            "financial",
            ActionId::Escalate,
        );
        assert!(rule_matches(&rule, &snap));
    }

    #[test]
    fn categorical_and_membership() {
        let snap = MetricSnapshot {
            document_category: Some("contract".into()),
            risk_types: Some(vec!["penalty".into(), "currency".into()]),
            ..MetricSnapshot::default()
        };
        let eq = ActionRule::categorical(
            RuleMetric::DocumentCategory,
            RuleOperator::Eq,
            "contract",
            ActionId::Escalate,
        );
        assert!(rule_matches(&eq, &snap));

        let present = ActionRule::categorical(
            RuleMetric::RiskTypePresent,
            RuleOperator::Eq,
            "penalty",
            ActionId::Escalate,
        );
        assert!(rule_matches(&present, &snap));

        let absent = ActionRule::categorical(
            RuleMetric::RiskTypePresent,
            RuleOperator::Neq,
            "sanctions",
            ActionId::Escalate,
        );
        assert!(rule_matches(&absent, &snap));
    }

    #[test]
    fn absent_boolean_check_never_matches() {
        let mut snap = MetricSnapshot::default();
        snap.boolean_checks.insert("has_signature".into(), false);

        for op in [RuleOperator::IsTrue, RuleOperator::IsFalse] {
            let rule = ActionRule::check("has_stamp", op, ActionId::ReturnToAuthor);
            assert!(!rule_matches(&rule, &snap));
        }

        let rule = ActionRule::check("has_signature", RuleOperator::IsFalse, ActionId::ReturnToAuthor);
        assert!(rule_matches(&rule, &snap));
    }

    #[test]
    fn and_chain_requires_every_rule() {
        let rules = vec![
            severity_rule(RuleOperator::Gte, 5.0, ActionId::Escalate).combined_with_next(Combinator::And),
            ActionRule::flag(RuleMetric::HasBlockingIssue, RuleOperator::IsTrue, ActionId::SkipNode),
        ];
        let mut snap = MetricSnapshot::with_severity(6.0);
        assert_eq!(
            evaluate_rules(&snap, &rules, ActionId::ContinueProcess),
            ActionId::ContinueProcess
        );
        snap.has_blocking_issue = true;
        assert_eq!(
            evaluate_rules(&snap, &rules, ActionId::ContinueProcess),
            ActionId::Escalate
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        // severity >= 9 OR (blocking AND category == contract)
        let rules = vec![
            severity_rule(RuleOperator::Gte, 9.0, ActionId::ReturnToAuthor)
                .combined_with_next(Combinator::Or),
            ActionRule::flag(RuleMetric::HasBlockingIssue, RuleOperator::IsTrue, ActionId::Escalate)
                .combined_with_next(Combinator::And),
            ActionRule::categorical(
                RuleMetric::DocumentCategory,
                RuleOperator::Eq,
                "contract",
                ActionId::Escalate,
            ),
        ];
        let blocking_only = MetricSnapshot {
            has_blocking_issue: true,
            ..MetricSnapshot::with_severity(1.0)
        };
        assert_eq!(
            evaluate_rules(&blocking_only, &rules, ActionId::ContinueProcess),
            ActionId::ContinueProcess
        );

        let blocking_contract = MetricSnapshot {
            document_category: Some("contract".into()),
            ..blocking_only.clone()
        };
        assert_eq!(
            evaluate_rules(&blocking_contract, &rules, ActionId::ContinueProcess),
            ActionId::ReturnToAuthor
        );

        let severe = MetricSnapshot::with_severity(9.5);
        assert_eq!(
            evaluate_rules(&severe, &rules, ActionId::ContinueProcess),
            ActionId::ReturnToAuthor
        );
    }

    #[test]
    fn trailing_combinator_is_ignored() {
        let rules = vec![severity_rule(RuleOperator::Gt, 1.0, ActionId::Escalate)
            .combined_with_next(Combinator::And)];
        let snap = MetricSnapshot::with_severity(2.0);
        assert_eq!(
            evaluate_rules(&snap, &rules, ActionId::ContinueProcess),
            ActionId::Escalate
        );
    }

    #[test]
    fn snapshot_from_result() {
        let mut checks = BTreeMap::new();
        checks.insert("has_vat".to_string(), true);
        let result = StructuredResult {
            status: ResponseStatus::Success,
            ai_analysis: Analysis {
                severity_score: 4.0,
                findings: vec![Finding::Detailed {
                    kind: "legal".into(),
                    text: "Missing penalty clause".into(),
                    blocking: true,
                }],
                artifact: None,
                violations_count: Some(2.0),
                has_blocking_issue: None,
                boolean_checks: checks,
            },
            execution_command: ExecutionCommand {
                action_id: ActionId::ContinueProcess,
                comment_to_user: String::new(),
                target_process_id: None,
                target_field_name: None,
                target_field_value: None,
            },
            document_profile: Some(DocumentProfile {
                category: "contract".into(),
                risk_types: vec!["penalty".into()],
                confidence: 0.9,
            }),
            time_saved_minutes: None,
        };
        let snap = MetricSnapshot::from_result(&result);
        assert_eq!(snap.risk_types, Some(vec!["penalty".to_string()]));
        assert_eq!(snap.severity_score, 4.0);
        assert_eq!(snap.violations_count, Some(2.0));
        assert_eq!(snap.confidence, Some(0.9));
        assert_eq!(snap.document_category.as_deref(), Some("contract"));
        assert!(snap.has_blocking_issue);
        assert_eq!(snap.boolean_checks.get("has_vat"), Some(&true));
    }
}
