//! Scenario model: the immutable definition of a pipeline run.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{ActionId, ActionRule, DocflowError, Result};

fn default_animation_delay_ms() -> u64 {
    1500
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMock {
    pub file_name: String,
    pub extracted_text: String,
}

/// Human-performed step; the run simply waits out its delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardStep {
    pub step_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default = "default_animation_delay_ms")]
    pub animation_delay_ms: u64,
}

/// A named yes/no question the reasoning service is asked to answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BooleanCheck {
    pub key: String,
    pub label: String,
    pub expected_in_doc: bool,
}

impl BooleanCheck {
    /// Build a check whose key is derived from `label` once, here. The key is
    /// stored and never recomputed, so later label edits do not break rules.
    pub fn from_label(label: impl Into<String>, expected_in_doc: bool) -> Self {
        let label = label.into();
        Self {
            key: generate_check_key(&label),
            label,
            expected_in_doc,
        }
    }
}

/// AI-performed step: its instruction is sent to the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiStep {
    pub step_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub active_prompt: String,
    /// File name of a knowledge document to embed in the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_knowledge_base: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_artifact_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boolean_checks_config: Vec<BooleanCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_rules: Vec<ActionRule>,
    /// Action used when no rule matches.
    #[serde(default)]
    pub default_action: ActionId,
}

impl AiStep {
    pub fn new(step_id: impl Into<String>, title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            title: title.into(),
            subtitle: None,
            active_prompt: prompt.into(),
            attached_knowledge_base: None,
            input_artifacts: Vec::new(),
            output_artifact_key: None,
            boolean_checks_config: Vec::new(),
            action_rules: Vec::new(),
            default_action: ActionId::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Step {
    #[serde(rename = "standard_node")]
    Standard(StandardStep),
    #[serde(rename = "ai_node")]
    Ai(AiStep),
}

impl Step {
    pub fn standard(step_id: impl Into<String>, title: impl Into<String>, delay_ms: u64) -> Self {
        Step::Standard(StandardStep {
            step_id: step_id.into(),
            title: title.into(),
            subtitle: None,
            animation_delay_ms: delay_ms,
        })
    }

    pub fn step_id(&self) -> &str {
        match self {
            Step::Standard(s) => &s.step_id,
            Step::Ai(s) => &s.step_id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Step::Standard(s) => &s.title,
            Step::Ai(s) => &s.title,
        }
    }

    pub fn as_ai(&self) -> Option<&AiStep> {
        match self {
            Step::Ai(s) => Some(s),
            Step::Standard(_) => None,
        }
    }

    pub fn is_ai(&self) -> bool {
        matches!(self, Step::Ai(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub scenario_id: String,
    pub scenario_name: String,
    pub document_mock: DocumentMock,
    pub visual_pipeline: Vec<Step>,
}

impl Scenario {
    /// Parse a scenario document and check its structure: a non-empty id and
    /// unique, non-empty step ids.
    pub fn from_json(scenario_id: &str, raw: &str) -> Result<Self> {
        let scenario: Scenario =
            serde_json::from_str(raw).map_err(|e| DocflowError::ScenarioInvalid {
                scenario_id: scenario_id.to_string(),
                message: e.to_string(),
            })?;
        scenario.check_structure()?;
        Ok(scenario)
    }

    pub fn check_structure(&self) -> Result<()> {
        let fail = |message: String| DocflowError::ScenarioInvalid {
            scenario_id: self.scenario_id.clone(),
            message,
        };
        if self.scenario_id.trim().is_empty() {
            return Err(fail("scenario_id is empty".into()));
        }
        let mut seen = HashSet::new();
        for step in &self.visual_pipeline {
            if step.step_id().trim().is_empty() {
                return Err(fail(format!("step '{}' has an empty step_id", step.title())));
            }
            if !seen.insert(step.step_id()) {
                return Err(fail(format!("duplicate step_id '{}'", step.step_id())));
            }
        }
        Ok(())
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.visual_pipeline.get(index)
    }

    pub fn len(&self) -> usize {
        self.visual_pipeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visual_pipeline.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Boolean-check key generation
// ---------------------------------------------------------------------------

const MAX_KEY_BODY: usize = 50;

fn transliterate(c: char) -> Option<&'static str> {
    Some(match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' => "e",
        'ё' => "yo",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'й' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "h",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "sch",
        'ъ' | 'ь' => "",
        'ы' => "y",
        'э' => "e",
        'ю' => "yu",
        'я' => "ya",
        ' ' => "_",
        _ => return None,
    })
}

/// Derive a stable `has_*` identifier from a human label.
///
/// Lowercases, transliterates Cyrillic, keeps `[a-z0-9_]`, collapses runs of
/// underscores and caps the body at 50 characters.
pub fn generate_check_key(label: &str) -> String {
    let mut mapped = String::with_capacity(label.len());
    for c in label.to_lowercase().chars() {
        match transliterate(c) {
            Some(s) => mapped.push_str(s),
            None => mapped.push(c),
        }
    }

    let mut body = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            continue;
        }
        if c == '_' && body.ends_with('_') {
            continue;
        }
        body.push(c);
    }
    body.truncate(MAX_KEY_BODY);
    format!("has_{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "scenario_id": "s1",
            "scenario_name": "Sample",
            "document_mock": { "file_name": "contract.pdf", "extracted_text": "Total: 100" },
            "visual_pipeline": [
                { "type": "standard_node", "step_id": "a", "title": "Register" },
                {
                    "type": "ai_node",
                    "step_id": "b",
                    "title": "Review",
                    "active_prompt": "Check the amount",
                    "output_artifact_key": "x"
                }
            ]
        }"#
    }

    #[test]
    fn parses_tagged_steps_with_defaults() {
        let scenario = Scenario::from_json("s1", sample_json()).unwrap();
        assert_eq!(scenario.len(), 2);
        match &scenario.visual_pipeline[0] {
            Step::Standard(s) => assert_eq!(s.animation_delay_ms, 1500),
            other => panic!("expected standard step, got {other:?}"),
        }
        let ai = scenario.visual_pipeline[1].as_ai().unwrap();
        assert_eq!(ai.output_artifact_key.as_deref(), Some("x"));
        assert!(ai.input_artifacts.is_empty());
        assert_eq!(ai.default_action, ActionId::ContinueProcess);
    }

    #[test]
    fn duplicate_step_ids_are_rejected() {
        let raw = sample_json().replace("\"step_id\": \"b\"", "\"step_id\": \"a\"");
        let err = Scenario::from_json("s1", &raw).unwrap_err();
        assert!(err.to_string().contains("duplicate step_id 'a'"));
    }

    #[test]
    fn unknown_step_type_is_rejected() {
        let raw = sample_json().replace("standard_node", "robot_node");
        assert!(matches!(
            Scenario::from_json("s1", &raw),
            Err(DocflowError::ScenarioInvalid { .. })
        ));
    }

    #[test]
    fn step_accessors() {
        let step = Step::standard("a", "Register", 10);
        assert_eq!(step.step_id(), "a");
        assert_eq!(step.title(), "Register");
        assert!(!step.is_ai());
        assert!(step.as_ai().is_none());
    }

    #[test]
    fn check_key_from_latin_label() {
        assert_eq!(generate_check_key("Signature Present"), "has_signature_present");
        assert_eq!(generate_check_key("VAT  --  amount!"), "has_vat_amount");
    }

    #[test]
    fn check_key_transliterates_cyrillic() {
        assert_eq!(generate_check_key("Есть подпись"), "has_est_podpis");
        assert_eq!(generate_check_key("Щука"), "has_schuka");
    }

    #[test]
    fn check_key_is_capped() {
        let key = generate_check_key(&"a".repeat(80));
        assert_eq!(key.len(), "has_".len() + 50);
    }

    #[test]
    fn boolean_check_keeps_generated_key() {
        let mut check = BooleanCheck::from_label("Has stamp", true);
        assert_eq!(check.key, "has_has_stamp");
        check.label = "Company stamp".into();
        assert_eq!(check.key, "has_has_stamp");
    }
}
