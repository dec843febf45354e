//! Inference: send one encoded page to the backend and return its raw text.
//!
//! The [`Extractor`] owns everything between "here is an image" and "here is
//! the model's answer": request assembly, the per-attempt timeout, and the
//! retry policy. Backends perform exactly one call each and classify their own
//! failures; this module decides which of those are worth another attempt.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 5xx and connection resets are transient and frequent under
//! load. Exponential backoff (`backoff_ms * 2^(attempt-1)`) avoids a
//! thundering herd: with 500 ms base and 3 retries the wait sequence is
//! 500 ms → 1 s → 2 s. A `Retry-After` from the server replaces the computed
//! delay when it is longer. Auth failures and rejected requests fail on the
//! first attempt.

use crate::backend::{
    Correction, InferenceBackend, InferenceRequest, InferenceResponse, INFERENCE_TEMPERATURE,
};
use crate::error::InferenceError;
use crate::pipeline::encode::EncodedPage;
use crate::progress::ProgressCallback;
use crate::schema;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// How the Extractor retries transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub backoff_ms: u64,
    /// Upper bound for any single delay.
    pub max_backoff_ms: u64,
    /// Timeout applied to each attempt.
    pub attempt_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 500,
            max_backoff_ms: 30_000,
            attempt_timeout_secs: 60,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32, retry_after_secs: Option<u64>) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        let computed = self.backoff_ms.saturating_mul(1u64 << exp);
        let requested = retry_after_secs.map_or(0, |s| s.saturating_mul(1000));
        Duration::from_millis(computed.max(requested).min(self.max_backoff_ms))
    }
}

/// A successful inference call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub response: InferenceResponse,
    /// Retries spent before the successful attempt.
    pub retries: u32,
    pub duration_ms: u64,
}

/// Sends pages to an [`InferenceBackend`] under a [`RetryPolicy`].
pub struct Extractor {
    backend: Arc<dyn InferenceBackend>,
    policy: RetryPolicy,
    instruction: String,
    max_output_tokens: usize,
}

impl Extractor {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        policy: RetryPolicy,
        instruction: impl Into<String>,
        max_output_tokens: usize,
    ) -> Self {
        Self {
            backend,
            policy,
            instruction: instruction.into(),
            max_output_tokens,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Assemble the request for one page: instruction, schema text, image.
    pub fn request(&self, image: &EncodedPage, correction: Option<Correction>) -> InferenceRequest {
        InferenceRequest {
            instruction: self.instruction.clone(),
            schema: schema::schema_prompt().to_string(),
            image: image.clone(),
            temperature: INFERENCE_TEMPERATURE,
            json_response: true,
            max_output_tokens: self.max_output_tokens,
            correction,
        }
    }

    /// Run `request`, retrying transient failures.
    ///
    /// Permanent failures, and any failure when retries are disabled, are
    /// returned unchanged after one attempt. When every attempt fails
    /// transiently the result is
    /// [`InferenceError::RetriesExhausted`] wrapping the last error.
    pub async fn extract(
        &self,
        request: &InferenceRequest,
        progress: Option<&ProgressCallback>,
    ) -> Result<Completion, InferenceError> {
        let start = Instant::now();
        let page_num = request.image.page_num;
        let mut retries = 0u32;

        loop {
            match self.attempt(request).await {
                Ok(response) => {
                    let duration = start.elapsed();
                    debug!(
                        "Page {}: {} input tokens, {} output tokens, {:?}",
                        page_num, response.input_tokens, response.output_tokens, duration
                    );
                    return Ok(Completion {
                        response,
                        retries,
                        duration_ms: duration.as_millis() as u64,
                    });
                }
                Err(e) if !e.is_transient() => {
                    warn!("Page {}: permanent inference failure: {}", page_num, e);
                    return Err(e);
                }
                Err(e) if retries >= self.policy.max_retries => {
                    if retries == 0 {
                        warn!("Page {}: inference failed, retries disabled: {}", page_num, e);
                        return Err(e);
                    }
                    warn!(
                        "Page {}: giving up after {} attempts: {}",
                        page_num,
                        retries + 1,
                        e
                    );
                    return Err(InferenceError::RetriesExhausted {
                        attempts: retries + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    retries += 1;
                    let delay = self.policy.delay_for(retries, e.retry_after_secs());
                    warn!(
                        "Page {}: attempt {} failed ({}), retry {}/{} after {}ms",
                        page_num,
                        retries,
                        e,
                        retries,
                        self.policy.max_retries,
                        delay.as_millis()
                    );
                    if let Some(cb) = progress {
                        cb.on_retry(page_num, retries, delay.as_millis() as u64, &e.to_string());
                    }
                    sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let secs = self.policy.attempt_timeout_secs;
        let response = timeout(Duration::from_secs(secs), self.backend.generate(request))
            .await
            .map_err(|_| InferenceError::Timeout {
                backend: self.backend.name().to_string(),
                secs,
            })??;

        if response.text.trim().is_empty() {
            return Err(InferenceError::EmptyResponse {
                backend: self.backend.name().to_string(),
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a scripted sequence of results.
    struct Scripted {
        script: Mutex<VecDeque<Result<InferenceResponse, InferenceError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(script: Vec<Result<InferenceResponse, InferenceError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl InferenceBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(text("{}")))
        }
    }

    fn text(s: &str) -> InferenceResponse {
        InferenceResponse {
            text: s.into(),
            input_tokens: 10,
            output_tokens: 5,
        }
    }

    fn server_error() -> InferenceError {
        InferenceError::Server {
            backend: "scripted".into(),
            status: 503,
            detail: "overloaded".into(),
        }
    }

    fn page() -> EncodedPage {
        EncodedPage {
            page_num: 1,
            mime_type: "image/png",
            data: "iVBORw0KGgo=".into(),
            width: 1,
            height: 1,
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_ms: 1,
            max_backoff_ms: 5,
            attempt_timeout_secs: 1,
        }
    }

    fn extractor(backend: Arc<Scripted>, policy: RetryPolicy) -> Extractor {
        Extractor::new(backend, policy, "instruction", 1024)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 5,
            backoff_ms: 500,
            max_backoff_ms: 3_000,
            attempt_timeout_secs: 60,
        };
        assert_eq!(p.delay_for(1, None), Duration::from_millis(500));
        assert_eq!(p.delay_for(2, None), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(3, None), Duration::from_millis(2_000));
        assert_eq!(p.delay_for(4, None), Duration::from_millis(3_000));
        assert_eq!(p.delay_for(40, None), Duration::from_millis(3_000));
    }

    #[test]
    fn retry_after_wins_when_longer() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1, Some(2)), Duration::from_millis(2_000));
        assert_eq!(p.delay_for(4, Some(1)), Duration::from_millis(4_000));
        assert_eq!(p.delay_for(1, Some(3_600)), Duration::from_millis(30_000));
    }

    #[test]
    fn request_carries_schema_and_zero_temperature() {
        let ex = extractor(Scripted::new(vec![]), fast_policy(0));
        let req = ex.request(&page(), None);
        assert_eq!(req.instruction, "instruction");
        assert_eq!(req.schema, schema::schema_prompt());
        assert_eq!(req.temperature, 0.0);
        assert!(req.json_response);
        assert!(req.correction.is_none());
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let backend = Scripted::new(vec![Err(server_error()), Err(server_error()), Ok(text("{\"a\":1}"))]);
        let ex = extractor(backend.clone(), fast_policy(3));
        let done = ex.extract(&ex.request(&page(), None), None).await.unwrap();
        assert_eq!(done.response.text, "{\"a\":1}");
        assert_eq!(done.retries, 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let backend = Scripted::new(vec![Err(InferenceError::Auth {
            backend: "scripted".into(),
            detail: "API key not valid".into(),
        })]);
        let ex = extractor(backend.clone(), fast_policy(3));
        let err = ex.extract(&ex.request(&page(), None), None).await.unwrap_err();
        assert!(matches!(err, InferenceError::Auth { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_wrap_last_error() {
        let backend = Scripted::new(vec![Err(server_error()), Err(server_error()), Err(server_error())]);
        let ex = extractor(backend.clone(), fast_policy(2));
        let err = ex.extract(&ex.request(&page(), None), None).await.unwrap_err();
        match err {
            InferenceError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, InferenceError::Server { status: 503, .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn blank_text_is_empty_response() {
        let backend = Scripted::new(vec![Ok(text("  \n"))]);
        let ex = extractor(backend.clone(), fast_policy(3));
        let err = ex.extract(&ex.request(&page(), None), None).await.unwrap_err();
        assert!(matches!(err, InferenceError::EmptyResponse { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    struct Hang;

    #[async_trait]
    impl InferenceBackend for Hang {
        fn name(&self) -> &str {
            "hang"
        }

        async fn generate(&self, _request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
            sleep(Duration::from_secs(3_600)).await;
            Ok(text("{}"))
        }
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let ex = Extractor::new(Arc::new(Hang), fast_policy(0), "i", 16);
        let err = ex.extract(&ex.request(&page(), None), None).await.unwrap_err();
        assert!(matches!(err, InferenceError::Timeout { secs: 1, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn without_retries_the_transient_error_is_returned_as_is() {
        let backend = Scripted::new(vec![Err(server_error()), Ok(text("{}"))]);
        let ex = extractor(backend.clone(), fast_policy(0));
        let err = ex.extract(&ex.request(&page(), None), None).await.unwrap_err();
        assert!(matches!(err, InferenceError::Server { status: 503, .. }), "got {err:?}");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
