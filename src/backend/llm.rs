//! edgequake-llm backend: any chat provider with vision support.
//!
//! The message layout follows the three-part request: the instruction as the
//! system message, then one user message carrying the schema text and the
//! page image. JSON mode is requested through `response_format`, but not
//! every provider honours it, so the mandate is repeated in the schema text
//! ("Return ONLY valid JSON …") and the parser strips the Markdown fence some
//! providers still add.
//!
//! Provider errors arrive as `LlmError` values; [`classify_llm_error`] maps
//! them onto [`InferenceError`] so the retry policy can tell a rate limit from
//! a bad key.

use super::{InferenceBackend, InferenceRequest, InferenceResponse};
use crate::error::InferenceError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, LlmError, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// OpenAI-style response format requesting a bare JSON object.
const JSON_RESPONSE_FORMAT: &str = "json_object";

static HTTP_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:status|http|error|code)\D{0,12}\b([45]\d\d)\b").expect("status regex is valid")
});

/// Wraps an `edgequake_llm::LLMProvider`.
pub struct LlmProviderBackend {
    provider: Arc<dyn LLMProvider>,
    name: String,
}

impl LlmProviderBackend {
    /// Wrap an already-constructed provider.
    pub fn new(provider: Arc<dyn LLMProvider>, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
        }
    }

    /// Build through `ProviderFactory::create_llm_provider`; the factory reads
    /// the provider's API key (`OPENAI_API_KEY`, …) from the environment.
    pub fn create(provider_name: &str, model: &str) -> Result<Self, InferenceError> {
        let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
            InferenceError::NotConfigured {
                backend: provider_name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        debug!("Using edgequake-llm provider {}/{}", provider_name, model);
        Ok(Self::new(provider, provider_name))
    }

    /// Auto-detect a provider from the API key variables in the environment.
    pub fn from_env() -> Result<Self, InferenceError> {
        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| InferenceError::NotConfigured {
                backend: "auto".to_string(),
                hint: format!(
                    "No inference backend could be auto-detected from environment.\n\
                    Set GEMINI_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY, or pass --provider.\n\
                    Error: {}",
                    e
                ),
            })?;
        Ok(Self::new(provider, "auto"))
    }
}

#[async_trait]
impl InferenceBackend for LlmProviderBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let messages = build_messages(request);
        let options = build_options(request);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify_llm_error(&self.name, &e))?;

        Ok(InferenceResponse {
            text: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// `CompletionOptions` for one request. JSON mode maps to the OpenAI-style
/// `json_object` response format; providers without one ignore it.
fn build_options(request: &InferenceRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: Some(request.max_output_tokens),
        response_format: request.json_response.then(|| JSON_RESPONSE_FORMAT.to_string()),
        ..Default::default()
    }
}

/// Message layout: system instruction, then schema text + image as one user
/// turn. A re-prompt appends the rejected answer and the correction to the
/// user text.
fn build_messages(request: &InferenceRequest) -> Vec<ChatMessage> {
    let image = ImageData::new(request.image.data.clone(), request.image.mime_type).with_detail("high");

    let mut text = request.schema.clone();
    if let Some(ref correction) = request.correction {
        text.push_str("\n\nYour previous answer was:\n");
        text.push_str(&correction.previous_answer);
        text.push_str("\n\n");
        text.push_str(&correction.message);
    }

    vec![
        ChatMessage::system(request.instruction.as_str()),
        ChatMessage::user_with_images(text.as_str(), vec![image]),
    ]
}

/// Map a provider error onto an [`InferenceError`].
///
/// Typed variants decide directly; catch-all variants (`ApiError`,
/// `ProviderError`, …) carry the HTTP status only in their text.
pub fn classify_llm_error(backend: &str, err: &LlmError) -> InferenceError {
    let detail = err.to_string();
    match err {
        LlmError::AuthError { .. } => InferenceError::Auth {
            backend: backend.to_string(),
            detail,
        },
        LlmError::RateLimited { .. } => InferenceError::RateLimited {
            backend: backend.to_string(),
            retry_after_secs: None,
        },
        LlmError::Timeout { .. } | LlmError::NetworkError { .. } => InferenceError::Unreachable {
            backend: backend.to_string(),
            detail,
        },
        LlmError::InvalidRequest { .. } | LlmError::ModelNotFound { .. } => {
            InferenceError::Rejected {
                backend: backend.to_string(),
                status: 400,
                detail,
            }
        }
        _ => classify_error(backend, &detail),
    }
}

/// Map provider error text onto an [`InferenceError`].
pub fn classify_error(backend: &str, detail: &str) -> InferenceError {
    let lower = detail.to_lowercase();
    let backend = backend.to_string();
    let detail = detail.to_string();
    let status = HTTP_STATUS
        .captures(&lower)
        .and_then(|c| c[1].parse::<u16>().ok());

    if matches!(status, Some(401 | 403))
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("incorrect api key")
        || lower.contains("authentication")
    {
        return InferenceError::Auth { backend, detail };
    }
    if status == Some(429) || lower.contains("rate limit") || lower.contains("too many requests") {
        return InferenceError::RateLimited {
            backend,
            retry_after_secs: None,
        };
    }
    match status {
        Some(s @ 500..=599) => InferenceError::Server {
            backend,
            status: s,
            detail,
        },
        Some(s) => InferenceError::Rejected {
            backend,
            status: s,
            detail,
        },
        None => InferenceError::Unreachable { backend, detail },
    }
}
