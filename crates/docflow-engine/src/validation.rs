//! Scenario validation: lint rules and diagnostics.
//!
//! Rule-level lints check each AI step's action rules (operator pairing,
//! thresholds, action parameters, boolean-check keys). Scenario-level lints
//! check how artifacts flow between steps. Call [`validate_scenario`] for
//! advisory diagnostics or [`validate_or_raise`] to reject a scenario with
//! any `Error`-severity issue.

use std::collections::HashSet;

use docflow_types::{
    ActionId, ActionRule, BooleanCheck, DocflowError, MetricValueType, RuleMetric, Scenario, Step,
};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub step_id: Option<String>,
    /// Position of the offending action rule within its step.
    pub rule_index: Option<usize>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        })
    }
}

/// The action rules of one step together with the checks they may refer to.
#[derive(Debug, Clone, Copy)]
pub struct RuleSet<'a> {
    pub step_id: Option<&'a str>,
    pub rules: &'a [ActionRule],
    pub checks: &'a [BooleanCheck],
}

impl RuleSet<'_> {
    fn diagnostic(
        &self,
        rule: &str,
        severity: Severity,
        index: usize,
        message: String,
        fix: Option<&str>,
    ) -> Diagnostic {
        Diagnostic {
            rule: rule.into(),
            severity,
            message: match self.step_id {
                Some(step) => format!("Step '{step}', rule #{}: {message}", index + 1),
                None => format!("Rule #{}: {message}", index + 1),
            },
            step_id: self.step_id.map(String::from),
            rule_index: Some(index),
            fix: fix.map(String::from),
        }
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, set: &RuleSet<'_>) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct OperatorPairingRule;
impl LintRule for OperatorPairingRule {
    fn name(&self) -> &str { "operator_pairing" }
    fn apply(&self, set: &RuleSet<'_>) -> Vec<Diagnostic> {
        set.rules
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.metric.value_type().accepts(r.operator))
            .map(|(i, r)| {
                let allowed: Vec<_> = r
                    .metric
                    .value_type()
                    .operators()
                    .iter()
                    .map(|op| op.symbol())
                    .collect();
                let fix = format!("Use one of: {}", allowed.join(", "));
                set.diagnostic(
                    self.name(),
                    Severity::Error,
                    i,
                    format!(
                        "operator '{}' is not valid for metric {:?}",
                        r.operator.symbol(),
                        r.metric
                    ),
                    Some(fix.as_str()),
                )
            })
            .collect()
    }
}

struct ThresholdPresentRule;
impl LintRule for ThresholdPresentRule {
    fn name(&self) -> &str { "threshold_present" }
    fn apply(&self, set: &RuleSet<'_>) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for (i, r) in set.rules.iter().enumerate() {
            let problem = match r.metric.value_type() {
                MetricValueType::Numeric => match r.threshold_number {
                    Some(n) if n.is_finite() => None,
                    Some(_) => Some("numeric threshold is not a finite number"),
                    None => Some("numeric metric needs threshold_number"),
                },
                MetricValueType::Categorical => match r.threshold_string.as_deref() {
                    Some(s) if !s.trim().is_empty() => None,
                    _ => Some("categorical metric needs a non-empty threshold_string"),
                },
                MetricValueType::Boolean => {
                    let keyed = r
                        .boolean_check_key
                        .as_deref()
                        .is_some_and(|k| !k.trim().is_empty());
                    if r.metric == RuleMetric::BooleanCheck && !keyed {
                        Some("boolean_check metric needs boolean_check_key")
                    } else {
                        None
                    }
                }
            };
            if let Some(problem) = problem {
                out.push(set.diagnostic(self.name(), Severity::Error, i, problem.into(), None));
            }
        }
        out
    }
}

struct ActionParamsRule;
impl LintRule for ActionParamsRule {
    fn name(&self) -> &str { "action_params" }
    fn apply(&self, set: &RuleSet<'_>) -> Vec<Diagnostic> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        set.rules
            .iter()
            .enumerate()
            .filter_map(|(i, r)| {
                let (missing, fix) = match r.action_id {
                    ActionId::StartSubprocess if blank(&r.target_process_id) => {
                        ("start_subprocess needs target_process_id", "Set target_process_id")
                    }
                    ActionId::SetField if blank(&r.target_field_name) => {
                        ("set_field needs target_field_name", "Set target_field_name")
                    }
                    _ => return None,
                };
                Some(set.diagnostic(self.name(), Severity::Error, i, missing.into(), Some(fix)))
            })
            .collect()
    }
}

struct CheckKeyKnownRule;
impl LintRule for CheckKeyKnownRule {
    fn name(&self) -> &str { "check_key_known" }
    fn apply(&self, set: &RuleSet<'_>) -> Vec<Diagnostic> {
        let known: HashSet<&str> = set.checks.iter().map(|c| c.key.as_str()).collect();
        set.rules
            .iter()
            .enumerate()
            .filter_map(|(i, r)| {
                let key = r.boolean_check_key.as_deref()?;
                if r.metric != RuleMetric::BooleanCheck || key.trim().is_empty() || known.contains(key) {
                    return None;
                }
                Some(set.diagnostic(
                    self.name(),
                    Severity::Warning,
                    i,
                    format!("boolean check '{key}' is not configured on this step; the rule never matches"),
                    Some("Add the check to boolean_checks_config or fix the key"),
                ))
            })
            .collect()
    }
}

struct TrailingCombinatorRule;
impl LintRule for TrailingCombinatorRule {
    fn name(&self) -> &str { "trailing_combinator" }
    fn apply(&self, set: &RuleSet<'_>) -> Vec<Diagnostic> {
        match set.rules.last() {
            Some(last) if last.combine_with_next.is_some() => vec![set.diagnostic(
                self.name(),
                Severity::Warning,
                set.rules.len() - 1,
                "combine_with_next on the last rule has no effect".into(),
                Some("Remove combine_with_next or add a following rule"),
            )],
            _ => vec![],
        }
    }
}

fn rule_lints() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(OperatorPairingRule),
        Box::new(ThresholdPresentRule),
        Box::new(ActionParamsRule),
        Box::new(CheckKeyKnownRule),
        Box::new(TrailingCombinatorRule),
    ]
}

// ---------------------------------------------------------------------------
// Scenario-level checks
// ---------------------------------------------------------------------------

fn scenario_lints(scenario: &Scenario) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    if scenario.is_empty() {
        out.push(Diagnostic {
            rule: "empty_pipeline".into(),
            severity: Severity::Info,
            message: format!("Scenario '{}' has no steps; a run completes immediately", scenario.scenario_id),
            step_id: None,
            rule_index: None,
            fix: None,
        });
    }

    let mut produced: HashSet<&str> = HashSet::new();
    for step in &scenario.visual_pipeline {
        let Step::Ai(ai) = step else { continue };

        if ai.active_prompt.trim().is_empty() {
            out.push(Diagnostic {
                rule: "prompt_present".into(),
                severity: Severity::Warning,
                message: format!("AI step '{}' has an empty prompt", ai.step_id),
                step_id: Some(ai.step_id.clone()),
                rule_index: None,
                fix: Some("Write the instruction in active_prompt".into()),
            });
        }

        for key in &ai.input_artifacts {
            if !produced.contains(key.as_str()) {
                out.push(Diagnostic {
                    rule: "artifact_flow".into(),
                    severity: Severity::Warning,
                    message: format!(
                        "AI step '{}' reads artifact '{key}', which no earlier step produces",
                        ai.step_id
                    ),
                    step_id: Some(ai.step_id.clone()),
                    rule_index: None,
                    fix: Some("Set output_artifact_key on an earlier AI step".into()),
                });
            }
        }

        let mut keys = HashSet::new();
        for check in &ai.boolean_checks_config {
            if !keys.insert(check.key.as_str()) {
                out.push(Diagnostic {
                    rule: "check_key_unique".into(),
                    severity: Severity::Error,
                    message: format!(
                        "AI step '{}' declares boolean check '{}' twice",
                        ai.step_id, check.key
                    ),
                    step_id: Some(ai.step_id.clone()),
                    rule_index: None,
                    fix: Some("Rename one of the checks".into()),
                });
            }
        }

        if let Some(key) = ai.output_artifact_key.as_deref() {
            produced.insert(key);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Lint one rule list against the boolean checks it may refer to.
pub fn validate_rules(rules: &[ActionRule], checks: &[BooleanCheck]) -> Vec<Diagnostic> {
    lint_rule_set(&RuleSet {
        step_id: None,
        rules,
        checks,
    })
}

fn lint_rule_set(set: &RuleSet<'_>) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for lint in rule_lints() {
        diagnostics.extend(lint.apply(set));
    }
    diagnostics
}

/// Run every lint over every AI step and the scenario as a whole.
pub fn validate_scenario(scenario: &Scenario) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for ai in scenario.visual_pipeline.iter().filter_map(Step::as_ai) {
        diagnostics.extend(lint_rule_set(&RuleSet {
            step_id: Some(&ai.step_id),
            rules: &ai.action_rules,
            checks: &ai.boolean_checks_config,
        }));
    }
    diagnostics.extend(scenario_lints(scenario));
    diagnostics
}

/// Run all lints; return `Err` if any `Error`-severity diagnostic is found.
pub fn validate_or_raise(scenario: &Scenario) -> docflow_types::Result<Vec<Diagnostic>> {
    let diagnostics = validate_scenario(scenario);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(DocflowError::ConfigError(errors.join("; ")));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
