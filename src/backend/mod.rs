//! Backend trait, normalized request/response types, and provider selection.
//!
//! The [`Backend`] trait abstracts over LLM providers, translating between
//! normalized [`LlmRequest`]/[`LlmResponse`] types and provider-specific
//! HTTP APIs.
//!
//! ## Architecture
//!
//! ```text
//! LlmNode ──► LlmRequest ──► Backend::complete() ──► LlmResponse
//!                                    │
//!             ┌──────────────────────┼──────────────────────┐
//!       OpenAiBackend        AnthropicBackend         OllamaBackend
//!   /v1/chat/completions       /v1/messages          /api/generate
//! ```
//!
//! Which backend an LLM node gets is decided once, at build time, from its
//! model name; see [`Provider::for_model`].

pub mod anthropic;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicBackend;
pub use mock::MockBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;

/// Text returned by the stub backend used for unrecognized model names.
pub const STUB_RESPONSE: &str = "This is a mock response from the LLM.";

/// A normalized LLM request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier (e.g. `"gpt-4o"`, `"claude-3-5-sonnet-latest"`).
    pub model: String,

    /// Optional system instructions.
    pub system_prompt: Option<String>,

    /// The rendered user prompt.
    pub prompt: String,

    /// Sampling temperature.
    pub temperature: f64,

    /// Upper bound on generated tokens. Providers that require one use
    /// [`DEFAULT_MAX_TOKENS`] when unset.
    pub max_tokens: Option<u32>,
}

/// Token cap sent to providers whose API requires one.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

impl LlmRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, temperature: f64) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            prompt: prompt.into(),
            temperature,
            max_tokens: None,
        }
    }
}

/// A normalized LLM response.
#[derive(Debug)]
pub struct LlmResponse {
    /// The generated text content.
    pub text: String,

    /// HTTP status code (for diagnostics/logging).
    pub status: u16,

    /// Provider-specific metadata (token counts, model info).
    pub metadata: Option<serde_json::Value>,
}

/// Abstraction over LLM providers.
///
/// Implementors own their endpoint and credentials and translate the
/// normalized [`LlmRequest`] into the provider's HTTP API.
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a non-streaming LLM call.
    async fn complete(&self, client: &Client, request: &LlmRequest) -> Result<LlmResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Provider families recognized from a model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Ollama,
}

impl Provider {
    /// Pick a provider by case-insensitive substring match on the model name.
    ///
    /// `gpt`/`openai` select OpenAI, `claude`/`anthropic` select Anthropic,
    /// `ollama`/`llama` select Ollama. Checked in that order.
    pub fn for_model(model: &str) -> Option<Self> {
        let model = model.to_ascii_lowercase();
        if model.contains("gpt") || model.contains("openai") {
            Some(Provider::OpenAi)
        } else if model.contains("claude") || model.contains("anthropic") {
            Some(Provider::Anthropic)
        } else if model.contains("ollama") || model.contains("llama") {
            Some(Provider::Ollama)
        } else {
            None
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenAi => write!(f, "openai"),
            Provider::Anthropic => write!(f, "anthropic"),
            Provider::Ollama => write!(f, "ollama"),
        }
    }
}

/// Endpoint and credentials for one provider.
#[derive(Clone, Default)]
pub struct Endpoint {
    pub base_url: String,
    pub api_key: Option<String>,
    /// OpenAI organization id; ignored by other providers.
    pub organization: Option<String>,
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(&base_url.into()),
            api_key: None,
            organization: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_deref().map(redact))
            .field("organization", &self.organization)
            .finish()
    }
}

/// Per-provider endpoints used to construct backends.
#[derive(Debug, Clone)]
pub struct Providers {
    pub openai: Endpoint,
    pub anthropic: Endpoint,
    pub ollama: Endpoint,
}

impl Default for Providers {
    fn default() -> Self {
        Self {
            openai: Endpoint::new("https://api.openai.com"),
            anthropic: Endpoint::new("https://api.anthropic.com"),
            ollama: Endpoint::new("http://localhost:11434"),
        }
    }
}

impl Providers {
    /// Construct the backend for `provider` from its configured endpoint.
    pub fn backend(&self, provider: Provider) -> Arc<dyn Backend> {
        match provider {
            Provider::OpenAi => Arc::new(self.openai_backend()),
            Provider::Anthropic => {
                let mut backend = AnthropicBackend::new(&self.anthropic.base_url);
                if let Some(key) = &self.anthropic.api_key {
                    backend = backend.with_api_key(key);
                }
                Arc::new(backend)
            }
            Provider::Ollama => Arc::new(OllamaBackend::new(&self.ollama.base_url)),
        }
    }

    fn openai_backend(&self) -> OpenAiBackend {
        let mut backend = OpenAiBackend::new(&self.openai.base_url);
        if let Some(key) = &self.openai.api_key {
            backend = backend.with_api_key(key);
        }
        if let Some(org) = &self.openai.organization {
            backend = backend.with_organization(org);
        }
        backend
    }
}

/// Show the first six characters of a secret.
pub(crate) fn redact(key: &str) -> String {
    match key.char_indices().nth(6) {
        Some((i, _)) => format!("{}***", &key[..i]),
        None => "***".to_string(),
    }
}

/// Strip known provider path suffixes from a base URL.
/// This prevents double-pathing when backends append their own paths.
/// e.g., "https://api.openai.com/v1" -> "https://api.openai.com"
pub(crate) fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    for suffix in &[
        "/v1/chat/completions",
        "/v1/messages",
        "/v1",
        "/api/generate",
        "/api",
    ] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

/// Turn a non-success response into [`PipelineError::HttpError`].
pub(crate) async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(PipelineError::HttpError { status, body })
}

/// Wrap a connection failure with the URL that was being contacted.
pub(crate) fn connect_error(url: &str, err: reqwest::Error) -> PipelineError {
    PipelineError::Other(format!("Failed to connect to LLM at {}: {}", url, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_matching_is_case_insensitive() {
        assert_eq!(Provider::for_model("GPT-4o"), Some(Provider::OpenAi));
        assert_eq!(Provider::for_model("openai/o1"), Some(Provider::OpenAi));
        assert_eq!(Provider::for_model("Claude-3-Opus"), Some(Provider::Anthropic));
        assert_eq!(Provider::for_model("anthropic.sonnet"), Some(Provider::Anthropic));
        assert_eq!(Provider::for_model("llama3.2:3b"), Some(Provider::Ollama));
        assert_eq!(Provider::for_model("mistral-large"), None);
    }

    #[test]
    fn openai_wins_over_llama_substring() {
        // "gpt" is checked before "llama"
        assert_eq!(Provider::for_model("gpt-llama-mix"), Some(Provider::OpenAi));
    }

    #[test]
    fn normalize_strips_known_suffixes() {
        assert_eq!(normalize_base_url("https://api.openai.com/v1/"), "https://api.openai.com");
        assert_eq!(normalize_base_url("http://localhost:11434/api"), "http://localhost:11434");
        assert_eq!(
            normalize_base_url("https://api.anthropic.com/v1/messages"),
            "https://api.anthropic.com"
        );
        assert_eq!(normalize_base_url("http://host:8000"), "http://host:8000");
    }

    #[test]
    fn endpoint_debug_redacts_key() {
        let endpoint = Endpoint::new("https://api.openai.com").with_api_key("sk-1234567890abcdef");
        let debug = format!("{:?}", endpoint);
        assert!(!debug.contains("1234567890abcdef"));
        assert!(debug.contains("sk-123***"));
        assert_eq!(redact("abc"), "***");
    }

    #[test]
    fn providers_build_matching_backends() {
        let providers = Providers::default();
        assert_eq!(providers.backend(Provider::OpenAi).name(), "openai");
        assert_eq!(providers.backend(Provider::Anthropic).name(), "anthropic");
        assert_eq!(providers.backend(Provider::Ollama).name(), "ollama");
    }

    #[test]
    fn openai_backend_carries_key_and_organization() {
        let mut providers = Providers::default();
        providers.openai = Endpoint::new("http://proxy:8080/v1")
            .with_api_key("sk-1234567890abcdef")
            .with_organization("org-jokes");

        let backend = providers.openai_backend();
        assert!(backend.has_api_key());
        let debug = format!("{:?}", backend);
        assert!(debug.contains("http://proxy:8080"));
        assert!(debug.contains("org-jokes"));
    }
}
