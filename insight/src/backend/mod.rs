//! Model backend adapter
//!
//! A uniform interface over the LLM providers the router can pick from.
//! Backends never cache; the orchestrator does, so that the routing
//! strategy becomes part of the cache key.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use openai::OpenAiCompatible;

/// Backends the router can choose between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendId {
    /// Higher-capability, more expensive model
    PrimaryLlm,
    /// Cheaper model used for specialist agents
    SecondaryLlm,
}

impl BackendId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::PrimaryLlm => "primary-llm",
            BackendId::SecondaryLlm => "secondary-llm",
        }
    }

    /// The escalation target
    pub fn alternate(&self) -> BackendId {
        match self {
            BackendId::PrimaryLlm => BackendId::SecondaryLlm,
            BackendId::SecondaryLlm => BackendId::PrimaryLlm,
        }
    }

    pub fn pricing(&self) -> Pricing {
        match self {
            BackendId::PrimaryLlm => Pricing {
                input_per_million: 0.015,
                output_per_million: 0.06,
            },
            BackendId::SecondaryLlm => Pricing {
                input_per_million: 0.28,
                output_per_million: 0.42,
            },
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Pricing {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_million + output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendErrorKind {
    Timeout,
    Auth,
    EmptyResponse,
    RateLimited,
    /// Transport failure or a server-side error
    Unavailable,
}

impl BackendErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendErrorKind::Timeout => "timeout",
            BackendErrorKind::Auth => "auth",
            BackendErrorKind::EmptyResponse => "empty-response",
            BackendErrorKind::RateLimited => "rate-limited",
            BackendErrorKind::Unavailable => "unavailable",
        }
    }

    /// Whether retrying later could succeed without operator action
    pub fn is_transient(&self) -> bool {
        !matches!(self, BackendErrorKind::Auth)
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{backend} failed ({kind}): {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub backend: BackendId,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, backend: BackendId, message: impl Into<String>) -> Self {
        Self {
            kind,
            backend,
            message: message.into(),
        }
    }

    pub fn timeout(backend: BackendId, after: Duration) -> Self {
        Self::new(
            BackendErrorKind::Timeout,
            backend,
            format!("no response within {}ms", after.as_millis()),
        )
    }

    pub fn empty(backend: BackendId) -> Self {
        Self::new(BackendErrorKind::EmptyResponse, backend, "backend returned no content")
    }

    pub fn unavailable(backend: BackendId, message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unavailable, backend, message)
    }
}

/// Token accounting for one call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub cost_usd: f64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// Sampling parameters for one call
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for InvocationParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: 4000,
            system_prompt: None,
        }
    }
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn id(&self) -> BackendId;

    /// Provider model name, for logs
    fn model(&self) -> &str;

    /// Run one completion. Implementations report a successful call with no
    /// content as `Ok` with empty text; [`BackendPool`] turns that into
    /// [`BackendErrorKind::EmptyResponse`].
    async fn complete(&self, prompt: &str, params: &InvocationParams) -> Result<Completion, BackendError>;
}

/// Configured backends plus the per-call deadline
#[derive(Clone)]
pub struct BackendPool {
    backends: HashMap<BackendId, Arc<dyn ModelBackend>>,
    timeout: Duration,
}

impl BackendPool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            backends: HashMap::new(),
            timeout,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backends.insert(backend.id(), backend);
        self
    }

    pub fn has(&self, id: BackendId) -> bool {
        self.backends.contains_key(&id)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invoke a backend with the pool deadline applied
    pub async fn invoke(
        &self,
        id: BackendId,
        prompt: &str,
        params: &InvocationParams,
    ) -> Result<Completion, BackendError> {
        let backend = self
            .backends
            .get(&id)
            .ok_or_else(|| BackendError::unavailable(id, "backend is not configured"))?;

        tracing::debug!("Invoking {} ({})", id, backend.model());
        let started = Instant::now();

        let mut completion = match tokio::time::timeout(self.timeout, backend.complete(prompt, params)).await {
            Ok(result) => result?,
            Err(_) => return Err(BackendError::timeout(id, self.timeout)),
        };

        if completion.text.trim().is_empty() {
            return Err(BackendError::empty(id));
        }

        completion.usage.latency_ms = started.elapsed().as_millis() as u64;
        completion.usage.cost_usd = id
            .pricing()
            .cost(completion.usage.input_tokens, completion.usage.output_tokens);
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        text: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl ModelBackend for Fixed {
        fn id(&self) -> BackendId {
            BackendId::SecondaryLlm
        }

        fn model(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _prompt: &str, _params: &InvocationParams) -> Result<Completion, BackendError> {
            tokio::time::sleep(self.delay).await;
            Ok(Completion {
                text: self.text.to_string(),
                usage: Usage {
                    input_tokens: 1_000_000,
                    output_tokens: 1_000_000,
                    ..Default::default()
                },
            })
        }
    }

    fn pool(text: &'static str, delay: Duration) -> BackendPool {
        BackendPool::new(Duration::from_millis(100)).with_backend(Arc::new(Fixed { text, delay }))
    }

    #[test]
    fn test_alternate_is_symmetric() {
        assert_eq!(BackendId::PrimaryLlm.alternate(), BackendId::SecondaryLlm);
        assert_eq!(BackendId::SecondaryLlm.alternate().alternate(), BackendId::SecondaryLlm);
    }

    #[test]
    fn test_pricing() {
        let cost = BackendId::PrimaryLlm.pricing().cost(1_000_000, 2_000_000);
        assert!((cost - 0.135).abs() < 1e-9);
    }

    #[test]
    fn test_only_auth_is_not_transient() {
        assert!(!BackendErrorKind::Auth.is_transient());
        assert!(BackendErrorKind::Timeout.is_transient());
        assert!(BackendErrorKind::EmptyResponse.is_transient());
    }

    #[tokio::test]
    async fn test_invoke_prices_usage() {
        let completion = pool("ok", Duration::ZERO)
            .invoke(BackendId::SecondaryLlm, "q", &InvocationParams::default())
            .await
            .unwrap();
        assert_eq!(completion.text, "ok");
        assert!((completion.usage.cost_usd - 0.70).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_whitespace_only_is_empty_response() {
        let err = pool("  \n", Duration::ZERO)
            .invoke(BackendId::SecondaryLlm, "q", &InvocationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::EmptyResponse);
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let err = pool("late", Duration::from_secs(5))
            .invoke(BackendId::SecondaryLlm, "q", &InvocationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_missing_backend_is_unavailable() {
        let err = pool("ok", Duration::ZERO)
            .invoke(BackendId::PrimaryLlm, "q", &InvocationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Unavailable);
        assert_eq!(err.backend, BackendId::PrimaryLlm);
    }
}
