//! Google Gemini backend over the native `generateContent` REST API.
//!
//! The request mirrors what the model needs and nothing more: one user turn
//! with three parts (instruction, schema text, inline PNG), temperature 0 and
//! `responseMimeType: application/json`, which constrains decoding to JSON on
//! the server side. A re-prompt appends the rejected answer as a `model` turn
//! followed by the correction as a new `user` turn.
//!
//! The API key travels in the `x-goog-api-key` header, never in the URL, so
//! it cannot leak through request logs or error messages.

use super::{InferenceBackend, InferenceRequest, InferenceResponse};
use crate::error::InferenceError;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Public Gemini endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const BACKEND: &str = "gemini";

/// Characters of an error body kept in error details.
const MAX_DETAIL_CHARS: usize = 300;

/// Gemini REST client.
#[derive(Clone)]
pub struct GeminiBackend {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    /// Per-request timeout, reported in [`InferenceError::Timeout`].
    timeout: Option<Duration>,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiBackend {
    /// Build a client with the given per-request timeout.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| InferenceError::NotConfigured {
                backend: BACKEND.into(),
                hint: format!("HTTP client could not be created: {}", e),
            })?;
        Ok(Self::with_client(http, api_key, model, base_url).with_timeout(timeout))
    }

    /// Build from an existing `reqwest::Client` (shared pools, custom proxies).
    pub fn with_client(
        http: reqwest::Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<&str>,
    ) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            timeout: None,
        }
    }

    /// Bound each request; an expiry maps to [`InferenceError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn send_error(&self, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                backend: BACKEND.into(),
                secs: self.timeout.map_or(0, |t| t.as_secs()),
            }
        } else {
            InferenceError::Unreachable {
                backend: BACKEND.into(),
                detail: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for GeminiBackend {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let body = build_body(request);
        debug!(
            "Gemini request: model={}, image={}x{}, reprompt={}",
            self.model,
            request.image.width,
            request.image.height,
            request.correction.is_some()
        );

        let mut builder = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await.map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            let err = classify_status(status.as_u16(), &text, retry_after);
            warn!("Gemini returned HTTP {}: {}", status.as_u16(), err);
            return Err(err);
        }

        let body: Value = response.json().await.map_err(|e| InferenceError::Server {
            backend: BACKEND.into(),
            status: status.as_u16(),
            detail: format!("response body is not JSON: {}", e),
        })?;
        parse_body(&body)
    }
}

/// Build the `generateContent` request body.
pub fn build_body(request: &InferenceRequest) -> Value {
    let mut contents = vec![json!({
        "role": "user",
        "parts": [
            { "text": request.instruction },
            { "text": request.schema },
            {
                "inlineData": {
                    "mimeType": request.image.mime_type,
                    "data": request.image.data,
                }
            }
        ]
    })];

    if let Some(ref correction) = request.correction {
        contents.push(json!({
            "role": "model",
            "parts": [{ "text": correction.previous_answer }]
        }));
        contents.push(json!({
            "role": "user",
            "parts": [{ "text": correction.message }]
        }));
    }

    let mut generation_config = json!({
        "temperature": request.temperature,
        "maxOutputTokens": request.max_output_tokens,
    });
    if request.json_response {
        generation_config["responseMimeType"] = json!("application/json");
    }

    json!({
        "contents": contents,
        "generationConfig": generation_config,
    })
}

/// Extract the answer text and token usage from a successful response.
pub fn parse_body(body: &Value) -> Result<InferenceResponse, InferenceError> {
    let candidate = body
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first());

    let Some(candidate) = candidate else {
        if let Some(reason) = body
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
        {
            return Err(InferenceError::Rejected {
                backend: BACKEND.into(),
                status: 200,
                detail: format!("prompt blocked: {}", reason),
            });
        }
        return Err(InferenceError::EmptyResponse {
            backend: BACKEND.into(),
        });
    };

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .unwrap_or("STOP");

    if text.trim().is_empty() {
        if matches!(finish_reason, "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT") {
            return Err(InferenceError::Rejected {
                backend: BACKEND.into(),
                status: 200,
                detail: format!("answer withheld: {}", finish_reason),
            });
        }
        return Err(InferenceError::EmptyResponse {
            backend: BACKEND.into(),
        });
    }

    if finish_reason == "MAX_TOKENS" {
        warn!("Gemini stopped at the output token limit; the JSON is likely truncated");
    }

    let usage = body.get("usageMetadata");
    let count = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };

    Ok(InferenceResponse {
        text,
        input_tokens: count("promptTokenCount"),
        output_tokens: count("candidatesTokenCount"),
    })
}

/// Map a non-success HTTP status onto an [`InferenceError`].
///
/// Gemini reports an invalid key as `400 INVALID_ARGUMENT`, not 401, so the
/// body is consulted before falling back to the status family.
pub fn classify_status(status: u16, body: &str, retry_after_secs: Option<u64>) -> InferenceError {
    let detail = error_message(body);
    let backend = BACKEND.to_string();
    match status {
        401 | 403 => InferenceError::Auth { backend, detail },
        400 if detail.contains("API key") || body.contains("API_KEY_INVALID") => {
            InferenceError::Auth { backend, detail }
        }
        429 => InferenceError::RateLimited {
            backend,
            retry_after_secs,
        },
        500..=599 => InferenceError::Server {
            backend,
            status,
            detail,
        },
        _ => InferenceError::Rejected {
            backend,
            status,
            detail,
        },
    }
}

/// `error.message` from a Google error body, else the truncated raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(MAX_DETAIL_CHARS).collect())
}
