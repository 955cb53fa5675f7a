//! Routing actions and action-rule configuration.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ActionId
// ---------------------------------------------------------------------------

/// Action chosen after an AI step, either by the reasoning service or by the
/// local rule evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionId {
    #[default]
    #[serde(alias = "approve", alias = "continue")]
    ContinueProcess,
    ReturnToAuthor,
    Escalate,
    AddComment,
    StartSubprocess,
    SetField,
    SkipNode,
}

impl ActionId {
    /// Returning the document to its author ends the run.
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionId::ReturnToAuthor)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionId::ContinueProcess => "continue_process",
            ActionId::ReturnToAuthor => "return_to_author",
            ActionId::Escalate => "escalate",
            ActionId::AddComment => "add_comment",
            ActionId::StartSubprocess => "start_subprocess",
            ActionId::SetField => "set_field",
            ActionId::SkipNode => "skip_node",
        }
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Metrics and operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricValueType {
    Numeric,
    Categorical,
    Boolean,
}

impl MetricValueType {
    /// Operators that may be paired with a metric of this type.
    pub fn operators(self) -> &'static [RuleOperator] {
        use RuleOperator::*;
        match self {
            MetricValueType::Numeric => &[Gt, Lt, Gte, Lte, Eq],
            MetricValueType::Categorical => &[Eq, Neq],
            MetricValueType::Boolean => &[IsTrue, IsFalse],
        }
    }

    pub fn accepts(self, op: RuleOperator) -> bool {
        self.operators().contains(&op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMetric {
    SeverityScore,
    ViolationsCount,
    Confidence,
    DocumentCategory,
    RiskTypePresent,
    HasBlockingIssue,
    BooleanCheck,
}

impl RuleMetric {
    pub fn value_type(self) -> MetricValueType {
        match self {
            RuleMetric::SeverityScore | RuleMetric::ViolationsCount | RuleMetric::Confidence => {
                MetricValueType::Numeric
            }
            RuleMetric::DocumentCategory | RuleMetric::RiskTypePresent => {
                MetricValueType::Categorical
            }
            RuleMetric::HasBlockingIssue | RuleMetric::BooleanCheck => MetricValueType::Boolean,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleOperator {
    #[serde(rename = "gt", alias = ">")]
    Gt,
    #[serde(rename = "lt", alias = "<")]
    Lt,
    #[serde(rename = "gte", alias = ">=")]
    Gte,
    #[serde(rename = "lte", alias = "<=")]
    Lte,
    #[serde(rename = "eq", alias = "==")]
    Eq,
    #[serde(rename = "neq", alias = "!=")]
    Neq,
    #[serde(rename = "is_true")]
    IsTrue,
    #[serde(rename = "is_false")]
    IsFalse,
}

impl RuleOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            RuleOperator::Gt => ">",
            RuleOperator::Lt => "<",
            RuleOperator::Gte => ">=",
            RuleOperator::Lte => "<=",
            RuleOperator::Eq => "==",
            RuleOperator::Neq => "!=",
            RuleOperator::IsTrue => "is_true",
            RuleOperator::IsFalse => "is_false",
        }
    }
}

/// How a rule joins with the rule that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    And,
    Or,
}

// ---------------------------------------------------------------------------
// ActionRule
// ---------------------------------------------------------------------------

/// One condition-to-action mapping. Rules are kept in an ordered list; the
/// position in that list is the priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub metric: RuleMetric,
    pub operator: RuleOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_number: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_string: Option<String>,
    /// Stable key of the boolean check, for `boolean_check` rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean_check_key: Option<String>,
    pub action_id: ActionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_process_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combine_with_next: Option<Combinator>,
}

impl ActionRule {
    /// Numeric rule: `metric op threshold -> action`.
    pub fn numeric(metric: RuleMetric, operator: RuleOperator, threshold: f64, action: ActionId) -> Self {
        Self {
            threshold_number: Some(threshold),
            ..Self::bare(metric, operator, action)
        }
    }

    /// Categorical rule: `metric op "value" -> action`.
    pub fn categorical(
        metric: RuleMetric,
        operator: RuleOperator,
        value: impl Into<String>,
        action: ActionId,
    ) -> Self {
        Self {
            threshold_string: Some(value.into()),
            ..Self::bare(metric, operator, action)
        }
    }

    /// Boolean rule on a fixed metric such as `has_blocking_issue`.
    pub fn flag(metric: RuleMetric, operator: RuleOperator, action: ActionId) -> Self {
        Self::bare(metric, operator, action)
    }

    /// Boolean rule on a named boolean check.
    pub fn check(key: impl Into<String>, operator: RuleOperator, action: ActionId) -> Self {
        Self {
            boolean_check_key: Some(key.into()),
            ..Self::bare(RuleMetric::BooleanCheck, operator, action)
        }
    }

    pub fn combined_with_next(mut self, combinator: Combinator) -> Self {
        self.combine_with_next = Some(combinator);
        self
    }

    fn bare(metric: RuleMetric, operator: RuleOperator, action_id: ActionId) -> Self {
        Self {
            id: None,
            metric,
            operator,
            threshold_number: None,
            threshold_string: None,
            boolean_check_key: None,
            action_id,
            target_process_id: None,
            target_field_name: None,
            target_field_value: None,
            combine_with_next: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approve_is_an_alias_for_continue_process() {
        let action: ActionId = serde_json::from_str("\"approve\"").unwrap();
        assert_eq!(action, ActionId::ContinueProcess);
        let action: ActionId = serde_json::from_str("\"continue\"").unwrap();
        assert_eq!(action, ActionId::ContinueProcess);
        assert_eq!(
            serde_json::to_string(&ActionId::ContinueProcess).unwrap(),
            "\"continue_process\""
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(serde_json::from_str::<ActionId>("\"shred_document\"").is_err());
    }

    #[test]
    fn only_return_to_author_is_terminal() {
        assert!(ActionId::ReturnToAuthor.is_terminal());
        assert!(!ActionId::Escalate.is_terminal());
        assert!(!ActionId::SkipNode.is_terminal());
        assert!(!ActionId::ContinueProcess.is_terminal());
    }

    #[test]
    fn operator_pairing_by_value_type() {
        assert!(RuleMetric::SeverityScore.value_type().accepts(RuleOperator::Gte));
        assert!(!RuleMetric::SeverityScore.value_type().accepts(RuleOperator::Neq));
        assert!(!RuleMetric::SeverityScore.value_type().accepts(RuleOperator::IsTrue));
        assert!(RuleMetric::DocumentCategory.value_type().accepts(RuleOperator::Neq));
        assert!(!RuleMetric::DocumentCategory.value_type().accepts(RuleOperator::Gt));
        assert!(RuleMetric::BooleanCheck.value_type().accepts(RuleOperator::IsFalse));
        assert!(!RuleMetric::HasBlockingIssue.value_type().accepts(RuleOperator::Eq));
    }

    #[test]
    fn operators_accept_symbol_aliases() {
        let op: RuleOperator = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(op, RuleOperator::Gte);
        let op: RuleOperator = serde_json::from_str("\"neq\"").unwrap();
        assert_eq!(op, RuleOperator::Neq);
        assert_eq!(serde_json::to_string(&RuleOperator::Lte).unwrap(), "\"lte\"");
    }

    #[test]
    fn rule_deserializes_from_authoring_json() {
        let rule: ActionRule = serde_json::from_str(
            r#"{
                "id": "r1",
                "metric": "severity_score",
                "operator": "gte",
                "threshold_number": 7,
                "action_id": "escalate",
                "combine_with_next": "AND"
            }"#,
        )
        .unwrap();
        assert_eq!(rule.metric, RuleMetric::SeverityScore);
        assert_eq!(rule.threshold_number, Some(7.0));
        assert_eq!(rule.action_id, ActionId::Escalate);
        assert_eq!(rule.combine_with_next, Some(Combinator::And));
        assert!(rule.boolean_check_key.is_none());
    }
}
