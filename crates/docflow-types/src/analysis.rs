//! Structured result returned by the reasoning service for one AI step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ActionId, DocflowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
    Timeout,
}

/// A finding is either a bare sentence or a typed record with a blocking flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Finding {
    Text(String),
    Detailed {
        #[serde(rename = "type")]
        kind: String,
        text: String,
        #[serde(default)]
        blocking: bool,
    },
}

impl Finding {
    pub fn text(&self) -> &str {
        match self {
            Finding::Text(text) | Finding::Detailed { text, .. } => text,
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Finding::Detailed { blocking: true, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentProfile {
    pub category: String,
    #[serde(default)]
    pub risk_types: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub severity_score: f64,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violations_count: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_blocking_issue: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub boolean_checks: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCommand {
    pub action_id: ActionId,
    pub comment_to_user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_process_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field_value: Option<String>,
}

/// Validated reply of the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResult {
    pub status: ResponseStatus,
    #[serde(alias = "analysis")]
    pub ai_analysis: Analysis,
    pub execution_command: ExecutionCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_profile: Option<DocumentProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_saved_minutes: Option<f64>,
}

impl StructuredResult {
    /// Parse a JSON reply and check the value ranges serde cannot express.
    pub fn from_json(raw: &str) -> Result<Self> {
        let result: Self =
            serde_json::from_str(raw).map_err(|e| DocflowError::InvalidResponse {
                message: e.to_string(),
            })?;
        result.validate()?;
        Ok(result)
    }

    /// Range checks: `severity_score` in [0, 10], `confidence` in [0, 1],
    /// `violations_count` and `time_saved_minutes` non-negative. Out-of-range values are rejected.
    pub fn validate(&self) -> Result<()> {
        let severity = self.ai_analysis.severity_score;
        if !severity.is_finite() || !(0.0..=10.0).contains(&severity) {
            return Err(invalid(format!(
                "severity_score {severity} outside [0, 10]"
            )));
        }
        if let Some(count) = self.ai_analysis.violations_count {
            if !count.is_finite() || count < 0.0 {
                return Err(invalid(format!("violations_count {count} is negative")));
            }
        }
        if let Some(profile) = &self.document_profile {
            if !profile.confidence.is_finite() || !(0.0..=1.0).contains(&profile.confidence) {
                return Err(invalid(format!(
                    "confidence {} outside [0, 1]",
                    profile.confidence
                )));
            }
        }
        if let Some(minutes) = self.time_saved_minutes {
            if !minutes.is_finite() || minutes < 0.0 {
                return Err(invalid(format!("time_saved_minutes {minutes} is negative")));
            }
        }
        Ok(())
    }

    /// The non-empty artifact string, if the service supplied one.
    pub fn artifact(&self) -> Option<&str> {
        self.ai_analysis
            .artifact
            .as_deref()
            .filter(|a| !a.trim().is_empty())
    }

    /// Explicit flag if present, otherwise derived from the findings.
    pub fn has_blocking_issue(&self) -> bool {
        self.ai_analysis
            .has_blocking_issue
            .unwrap_or_else(|| self.ai_analysis.findings.iter().any(Finding::is_blocking))
    }
}

fn invalid(message: String) -> DocflowError {
    DocflowError::InvalidResponse { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "status": "success",
        "ai_analysis": {
            "severity_score": 2,
            "findings": ["Amount within limits"],
            "artifact": "Approved"
        },
        "execution_command": {
            "action_id": "approve",
            "comment_to_user": "No remarks."
        },
        "time_saved_minutes": 12
    }"#;

    #[test]
    fn parses_minimal_reply() {
        let result = StructuredResult::from_json(MINIMAL).unwrap();
        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.ai_analysis.severity_score, 2.0);
        assert_eq!(result.ai_analysis.findings[0].text(), "Amount within limits");
        assert_eq!(result.artifact(), Some("Approved"));
        assert_eq!(result.execution_command.action_id, ActionId::ContinueProcess);
        assert_eq!(result.time_saved_minutes, Some(12.0));
        assert!(result.document_profile.is_none());
    }

    #[test]
    fn parses_extended_reply_with_profile_and_checks() {
        let raw = r#"{
            "status": "success",
            "document_profile": {
                "category": "purchase_contract",
                "risk_types": ["financial"],
                "confidence": 0.9
            },
            "analysis": {
                "severity_score": 6.5,
                "violations_count": 2,
                "has_blocking_issue": false,
                "boolean_checks": { "has_signature": true },
                "findings": [
                    { "type": "financial", "text": "Penalty clause missing", "blocking": true }
                ]
            },
            "execution_command": {
                "action_id": "escalate",
                "comment_to_user": "Needs legal review."
            }
        }"#;
        let result = StructuredResult::from_json(raw).unwrap();
        assert_eq!(result.ai_analysis.violations_count, Some(2.0));
        assert_eq!(result.ai_analysis.boolean_checks.get("has_signature"), Some(&true));
        assert!(result.ai_analysis.findings[0].is_blocking());
        // Explicit flag wins over the blocking finding.
        assert!(!result.has_blocking_issue());
        assert_eq!(result.document_profile.unwrap().risk_types, vec!["financial"]);
    }

    #[test]
    fn blocking_flag_derived_from_findings_when_absent() {
        let raw = r#"{
            "status": "success",
            "ai_analysis": {
                "severity_score": 9,
                "findings": [{ "type": "legal", "text": "No signature", "blocking": true }]
            },
            "execution_command": { "action_id": "return_to_author", "comment_to_user": "Sign it." }
        }"#;
        let result = StructuredResult::from_json(raw).unwrap();
        assert!(result.has_blocking_issue());
    }

    #[test]
    fn severity_out_of_range_is_rejected() {
        let raw = MINIMAL.replace("\"severity_score\": 2", "\"severity_score\": 11");
        let err = StructuredResult::from_json(&raw).unwrap_err();
        assert!(matches!(err, DocflowError::InvalidResponse { .. }));
        assert!(err.to_string().contains("severity_score"));
    }

    #[test]
    fn violations_count_accepts_any_non_negative_number() {
        let raw = MINIMAL.replace(
            "\"artifact\": \"Approved\"",
            "\"artifact\": \"Approved\", \"violations_count\": 2.0",
        );
        let result = StructuredResult::from_json(&raw).unwrap();
        assert_eq!(result.ai_analysis.violations_count, Some(2.0));

        let raw = raw.replace("2.0", "-1");
        let err = StructuredResult::from_json(&raw).unwrap_err();
        assert!(matches!(err, DocflowError::InvalidResponse { .. }));
        assert!(err.to_string().contains("violations_count"));
    }

    #[test]
    fn missing_execution_command_is_rejected() {
        let raw = r#"{ "status": "success", "ai_analysis": { "severity_score": 1 } }"#;
        assert!(matches!(
            StructuredResult::from_json(raw),
            Err(DocflowError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn blank_artifact_counts_as_absent() {
        let raw = MINIMAL.replace("\"artifact\": \"Approved\"", "\"artifact\": \"  \"");
        let result = StructuredResult::from_json(&raw).unwrap();
        assert_eq!(result.artifact(), None);
    }
}
