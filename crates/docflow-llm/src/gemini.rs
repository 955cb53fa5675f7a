use async_trait::async_trait;
use serde_json::json;

use crate::{FinishReason, Message, ProviderAdapter, Request, Response, Role, Usage};
use docflow_types::DocflowError;

// ---------------------------------------------------------------------------
// GeminiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct GeminiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl GeminiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            default_model: "gemini-1.5-flash".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn from_env() -> Result<Self, DocflowError> {
        let key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| DocflowError::AuthError {
                provider: "google".into(),
            })?;
        Ok(Self::new(key))
    }

    fn build_request_body(&self, request: &Request) -> serde_json::Value {
        let system_texts: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text.as_str())
            .collect();

        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(convert_message)
            .collect();

        let mut body = json!({
            "contents": contents,
        });

        if !system_texts.is_empty() {
            let parts: Vec<serde_json::Value> =
                system_texts.iter().map(|t| json!({ "text": t })).collect();
            body["systemInstruction"] = json!({ "parts": parts });
        }

        let mut gen_config = json!({});
        if let Some(max_tokens) = request.max_tokens {
            gen_config["maxOutputTokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            gen_config["temperature"] = json!(temp);
        }
        if gen_config.as_object().is_some_and(|o| !o.is_empty()) {
            body["generationConfig"] = gen_config;
        }

        body
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<Response, DocflowError> {
        let candidates = json["candidates"]
            .as_array()
            .ok_or_else(|| DocflowError::InvalidResponse {
                message: "Missing candidates in response".into(),
            })?;

        let candidate = candidates
            .first()
            .ok_or_else(|| DocflowError::InvalidResponse {
                message: "Empty candidates array".into(),
            })?;

        let finish_reason = match candidate["finishReason"].as_str() {
            Some("MAX_TOKENS") => FinishReason::MaxTokens,
            Some("SAFETY") => FinishReason::Safety,
            Some("STOP_SEQUENCE") => FinishReason::StopSequence,
            _ => FinishReason::EndTurn,
        };

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(DocflowError::InvalidResponse {
                message: format!("Empty reply (finish reason {finish_reason:?})"),
            });
        }

        let usage_meta = &json["usageMetadata"];
        let input_tokens = usage_meta["promptTokenCount"].as_u64().unwrap_or(0);
        let output_tokens = usage_meta["candidatesTokenCount"].as_u64().unwrap_or(0);
        let total_tokens = usage_meta["totalTokenCount"]
            .as_u64()
            .unwrap_or(input_tokens + output_tokens);

        Ok(Response {
            id: uuid::Uuid::new_v4().to_string(),
            text,
            usage: Usage {
                input_tokens,
                output_tokens,
                total_tokens,
            },
            model: String::new(),
            finish_reason,
        })
    }
}

// ---------------------------------------------------------------------------
// Message conversion
// ---------------------------------------------------------------------------

/// System messages travel in `systemInstruction`; everything else is a user turn.
fn convert_message(msg: &Message) -> serde_json::Value {
    json!({
        "role": "user",
        "parts": [{ "text": msg.text }]
    })
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(status: reqwest::StatusCode, body: &str) -> DocflowError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => DocflowError::RateLimited {
            provider: "google".into(),
            retry_after_ms: 1000,
        },
        401 | 403 => DocflowError::AuthError {
            provider: "google".into(),
        },
        _ => DocflowError::ProviderError {
            provider: "google".into(),
            status: status_u16,
            message: extract_error_message(body),
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, DocflowError> {
        let body = self.build_request_body(request);
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DocflowError::ProviderError {
                provider: "google".into(),
                status: 0,
                message: e.to_string(),
            })?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| DocflowError::ProviderError {
            provider: "google".into(),
            status: 0,
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(map_error(status, &response_body));
        }

        let json: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| DocflowError::InvalidResponse {
                message: format!("Failed to parse response envelope: {e}"),
            })?;

        let mut response = self.parse_response(json)?;
        response.model = model.to_string();
        Ok(response)
    }

    fn name(&self) -> &str {
        "google"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
