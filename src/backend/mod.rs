//! Inference backends: clients for the external vision-language endpoint.
//!
//! The pipeline treats the endpoint as a black box behind
//! [`InferenceBackend`]: given an instruction, the schema text and one page
//! image, return text that should be JSON. Two implementations ship:
//!
//! * [`gemini::GeminiBackend`]: Google Gemini over its native REST API, with
//!   `responseMimeType: application/json` so the model is constrained to JSON.
//! * [`llm::LlmProviderBackend`]: any provider supported by `edgequake-llm`
//!   (OpenAI, Anthropic, Ollama, Azure, …).
//!
//! Generation parameters are not configurable: temperature is pinned to
//! [`INFERENCE_TEMPERATURE`] and the JSON mandate is always on. Extraction is
//! transcription, not generation.

pub mod gemini;
pub mod llm;

use crate::config::ExtractionConfig;
use crate::error::InferenceError;
use crate::pipeline::encode::EncodedPage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use gemini::GeminiBackend;
pub use llm::LlmProviderBackend;

/// Sampling temperature for every extraction request.
pub const INFERENCE_TEMPERATURE: f32 = 0.0;

/// One request to the inference endpoint.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Role-establishing instruction.
    pub instruction: String,
    /// Schema text, sent verbatim.
    pub schema: String,
    pub image: EncodedPage,
    pub temperature: f32,
    /// Require a well-formed JSON answer.
    pub json_response: bool,
    pub max_output_tokens: usize,
    /// Present only on the re-prompt after an undecodable answer.
    pub correction: Option<Correction>,
}

/// Context for a re-prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    /// The answer that failed to decode.
    pub previous_answer: String,
    /// Instruction explaining what went wrong.
    pub message: String,
}

/// Raw answer from the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferenceResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Client for an external vision-language endpoint.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short identifier used in logs and errors, e.g. `gemini`.
    fn name(&self) -> &str;

    /// Perform one call. No retries; the Extractor owns the retry policy.
    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError>;
}

/// Default Gemini model.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Default model for edgequake-llm providers when none is named.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4.1-nano";

/// Resolve the backend, from most-specific to least-specific:
///
/// 1. **Pre-built backend** (`config.backend`), used as-is.
/// 2. **Named provider** (`config.provider_name`): `gemini` builds the REST
///    backend, anything else goes through the edgequake-llm factory.
/// 3. **Gemini credential** (`config.api_key`, `GEMINI_API_KEY`,
///    `GOOGLE_API_KEY`).
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 5. **OpenAI key** (`OPENAI_API_KEY`), so users holding several provider
///    keys get a predictable default.
/// 6. **Auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_backend(config: &ExtractionConfig) -> Result<Arc<dyn InferenceBackend>, InferenceError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }

    let timeout = Duration::from_secs(config.api_timeout_secs);

    if let Some(ref name) = config.provider_name {
        let name = name.trim().to_lowercase();
        if name == "gemini" || name == "google" {
            return gemini_from_config(config, timeout);
        }
        let model = config.model.as_deref().unwrap_or(DEFAULT_LLM_MODEL);
        return LlmProviderBackend::create(&name, model).map(|b| Arc::new(b) as Arc<dyn InferenceBackend>);
    }

    if config.api_key.is_some() || gemini_key_from_env().is_some() {
        return gemini_from_config(config, timeout);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            debug!("Using provider from environment: {}/{}", prov, model);
            return LlmProviderBackend::create(&prov, &model)
                .map(|b| Arc::new(b) as Arc<dyn InferenceBackend>);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or(DEFAULT_LLM_MODEL);
        return LlmProviderBackend::create("openai", model)
            .map(|b| Arc::new(b) as Arc<dyn InferenceBackend>);
    }

    LlmProviderBackend::from_env().map(|b| Arc::new(b) as Arc<dyn InferenceBackend>)
}

fn gemini_from_config(
    config: &ExtractionConfig,
    timeout: Duration,
) -> Result<Arc<dyn InferenceBackend>, InferenceError> {
    let api_key = config
        .api_key
        .clone()
        .or_else(gemini_key_from_env)
        .ok_or_else(|| InferenceError::NotConfigured {
            backend: "gemini".into(),
            hint: "Set GEMINI_API_KEY (or GOOGLE_API_KEY), or pass --api-key.".into(),
        })?;
    let model = config.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
    let backend = GeminiBackend::new(api_key, model, config.api_base_url.as_deref(), timeout)?;
    Ok(Arc::new(backend))
}

fn gemini_key_from_env() -> Option<String> {
    ["GEMINI_API_KEY", "GOOGLE_API_KEY"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|k| !k.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl InferenceBackend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
            Ok(InferenceResponse {
                text: "{}".into(),
                ..Default::default()
            })
        }
    }

    #[test]
    fn explicit_backend_wins() {
        let config = ExtractionConfig::builder()
            .backend(Arc::new(Fixed))
            .provider_name("gemini")
            .build()
            .unwrap();
        let backend = resolve_backend(&config).unwrap();
        assert_eq!(backend.name(), "fixed");
    }

    #[test]
    fn explicit_api_key_selects_gemini() {
        let config = ExtractionConfig::builder()
            .api_key("test-key")
            .model("gemini-2.5-pro")
            .build()
            .unwrap();
        let backend = resolve_backend(&config).unwrap();
        assert_eq!(backend.name(), "gemini");
    }

    #[test]
    fn named_gemini_provider_uses_config_key() {
        let config = ExtractionConfig::builder()
            .provider_name("Gemini")
            .api_key("test-key")
            .build()
            .unwrap();
        assert_eq!(resolve_backend(&config).unwrap().name(), "gemini");
    }
}
