use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::{FinishReason, ProviderAdapter, Request, Response, Usage};
use docflow_types::DocflowError;

// ---------------------------------------------------------------------------
// OfflineReviewer
// ---------------------------------------------------------------------------

/// Keyword-driven stand-in for a real reasoning service.
///
/// Looks at the prompt text only: prompts mentioning a contract are approved
/// with a low severity, prompts mentioning a letter are returned to the
/// author, anything else is approved with severity 0. Replies are well-formed
/// JSON so they go through the same parsing path as a live provider.
#[derive(Debug, Clone, Default)]
pub struct OfflineReviewer {
    latency: Duration,
}

const CONTRACT_KEYWORDS: &[&str] = &["contract", "договор"];
const LETTER_KEYWORDS: &[&str] = &["letter", "письмо"];

impl OfflineReviewer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated service latency applied before every reply.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn review(prompt: &str) -> serde_json::Value {
        let lower = prompt.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if mentions(CONTRACT_KEYWORDS) {
            json!({
                "status": "success",
                "ai_analysis": {
                    "severity_score": 2,
                    "findings": [
                        "Contract amount is within limits",
                        "Counterparty details verified",
                        "No risks detected"
                    ],
                    "artifact": "Approved by offline reviewer"
                },
                "execution_command": {
                    "action_id": "approve",
                    "comment_to_user": "Contract reviewed. No remarks."
                },
                "time_saved_minutes": 12
            })
        } else if mentions(LETTER_KEYWORDS) {
            json!({
                "status": "success",
                "ai_analysis": {
                    "severity_score": 8,
                    "findings": [
                        "Tone of the letter is too harsh",
                        "Mandatory greeting is missing",
                        "Grammar errors"
                    ],
                    "artifact": "Needs rework"
                },
                "execution_command": {
                    "action_id": "return_to_author",
                    "comment_to_user": "The letter is too harsh. Please rewrite it more politely."
                },
                "time_saved_minutes": 5
            })
        } else {
            json!({
                "status": "success",
                "ai_analysis": {
                    "severity_score": 0,
                    "findings": ["Analysis completed"],
                    "artifact": "OK"
                },
                "execution_command": {
                    "action_id": "approve",
                    "comment_to_user": "All good."
                },
                "time_saved_minutes": 1
            })
        }
    }
}

#[async_trait]
impl ProviderAdapter for OfflineReviewer {
    async fn complete(&self, request: &Request) -> Result<Response, DocflowError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let prompt = request.user_text();
        let text = Self::review(&prompt).to_string();
        let input_tokens = prompt.split_whitespace().count() as u64;
        let output_tokens = text.split_whitespace().count() as u64;
        Ok(Response {
            id: uuid::Uuid::new_v4().to_string(),
            text,
            usage: Usage {
                input_tokens,
                output_tokens,
                total_tokens: input_tokens + output_tokens,
            },
            model: self.default_model().to_string(),
            finish_reason: FinishReason::EndTurn,
        })
    }

    fn name(&self) -> &str {
        "offline"
    }

    fn default_model(&self) -> &str {
        "offline-reviewer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_reply, Message};
    use docflow_types::ActionId;

    fn request(prompt: &str) -> Request {
        Request {
            model: String::new(),
            messages: vec![Message::user(prompt)],
            max_tokens: None,
            temperature: None,
        }
    }

    #[tokio::test]
    async fn contract_is_approved() {
        let resp = OfflineReviewer::new()
            .complete(&request("Review this Contract for totals"))
            .await
            .unwrap();
        let result = parse_reply(&resp.text).unwrap();
        assert_eq!(result.execution_command.action_id, ActionId::ContinueProcess);
        assert_eq!(result.ai_analysis.severity_score, 2.0);
        assert_eq!(result.time_saved_minutes, Some(12.0));
    }

    #[tokio::test]
    async fn letter_is_returned_to_author() {
        let resp = OfflineReviewer::new()
            .complete(&request("Проверь письмо клиенту"))
            .await
            .unwrap();
        let result = parse_reply(&resp.text).unwrap();
        assert_eq!(result.execution_command.action_id, ActionId::ReturnToAuthor);
        assert_eq!(result.ai_analysis.severity_score, 8.0);
        assert_eq!(result.artifact(), Some("Needs rework"));
    }

    #[tokio::test]
    async fn contract_wins_over_letter() {
        let resp = OfflineReviewer::new()
            .complete(&request("a cover letter attached to the contract"))
            .await
            .unwrap();
        let result = parse_reply(&resp.text).unwrap();
        assert_eq!(result.execution_command.action_id, ActionId::ContinueProcess);
    }

    #[tokio::test]
    async fn anything_else_is_approved_with_zero_severity() {
        let resp = OfflineReviewer::new()
            .complete(&request("invoice"))
            .await
            .unwrap();
        let result = parse_reply(&resp.text).unwrap();
        assert_eq!(result.ai_analysis.severity_score, 0.0);
        assert_eq!(result.artifact(), Some("OK"));
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_simulated() {
        let start = tokio::time::Instant::now();
        OfflineReviewer::new()
            .with_latency(Duration::from_secs(2))
            .complete(&request("x"))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
