use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use docflow_types::{DocflowError, ResponseStatus, StructuredResult};
use regex::Regex;

use crate::{DynProvider, Message, ProviderAdapter, Request, Response};

/// Number of extra attempts after a transient failure.
const RETRY_LIMIT: usize = 1;

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut Request) {}
    fn after(&self, _request: &Request, _response: &mut Response) {}
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut Request) {
        tracing::info!(
            model = %request.model,
            prompt_len = request.user_text().len(),
            "Reasoning request"
        );
    }

    fn after(&self, _request: &Request, response: &mut Response) {
        tracing::info!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "Reasoning response"
        );
    }
}

// ---------------------------------------------------------------------------
// Built-in middleware: UsageTrackingMiddleware
// ---------------------------------------------------------------------------

/// Accumulates token usage across calls. Clones share the same counters.
#[derive(Clone, Default)]
pub struct UsageTrackingMiddleware {
    total_input: Arc<AtomicU64>,
    total_output: Arc<AtomicU64>,
}

impl UsageTrackingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input.load(Ordering::Relaxed)
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output.load(Ordering::Relaxed)
    }
}

impl Middleware for UsageTrackingMiddleware {
    fn after(&self, _request: &Request, response: &mut Response) {
        self.total_input
            .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
        self.total_output
            .fetch_add(response.usage.output_tokens, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// ReasoningConfig
// ---------------------------------------------------------------------------

/// Generation settings and the overall deadline for one reasoning call.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    /// Model name; empty means the provider's default.
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Deadline covering the first attempt and the retry together.
    pub timeout: Duration,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.1,
            max_tokens: 2048,
            timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\r?\n?```$").expect("fence regex is valid")
    })
}

/// Remove a surrounding markdown code fence (```` ```json ... ``` ````), if any.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match fence_regex().captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Strip fencing, parse, and validate a raw service reply. A reply that
/// reports a non-success status is a failure, not a result.
pub fn parse_reply(text: &str) -> Result<StructuredResult, DocflowError> {
    let result = StructuredResult::from_json(strip_code_fence(text))?;
    if result.status != ResponseStatus::Success {
        let status = serde_json::to_value(result.status)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        return Err(DocflowError::ServiceReportedFailure { status });
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// ReasoningClient
// ---------------------------------------------------------------------------

/// Sends compiled prompts to a provider and returns validated results.
///
/// The whole call, including the single retry, is bounded by
/// [`ReasoningConfig::timeout`]. A timeout is surfaced immediately; any other
/// failure is retried once with the same request.
pub struct ReasoningClient {
    provider: DynProvider,
    config: ReasoningConfig,
    middleware: Vec<Box<dyn Middleware>>,
}

impl ReasoningClient {
    pub fn new(provider: impl ProviderAdapter + 'static, config: ReasoningConfig) -> Self {
        Self {
            provider: DynProvider::new(provider),
            config,
            middleware: Vec::new(),
        }
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn build_request(&self, prompt: &str) -> Request {
        let model = if self.config.model.is_empty() {
            self.provider.default_model().to_string()
        } else {
            self.config.model.clone()
        };
        Request {
            model,
            messages: vec![Message::user(prompt)],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
        }
    }

    pub async fn infer(&self, prompt: &str) -> Result<StructuredResult, DocflowError> {
        let request = self.build_request(prompt);
        match tokio::time::timeout(self.config.timeout, self.infer_with_retry(&request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    provider = %self.provider.name(),
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "Reasoning call timed out"
                );
                Err(DocflowError::RequestTimeout {
                    provider: self.provider.name().to_string(),
                    timeout_ms: self.config.timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn infer_with_retry(&self, request: &Request) -> Result<StructuredResult, DocflowError> {
        let mut attempt = 0;
        loop {
            match self.attempt(request).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < RETRY_LIMIT => {
                    attempt += 1;
                    tracing::warn!(
                        provider = %self.provider.name(),
                        attempt,
                        error = %e,
                        "Reasoning call failed, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, request: &Request) -> Result<StructuredResult, DocflowError> {
        let mut req = request.clone();
        for m in &self.middleware {
            m.before(&mut req);
        }

        let mut resp = self.provider.complete(&req).await?;

        for m in &self.middleware {
            m.after(&req, &mut resp);
        }

        parse_reply(&resp.text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
