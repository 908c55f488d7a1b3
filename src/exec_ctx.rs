//! Execution context shared across node invocations.
//!
//! [`ExecCtx`] carries the HTTP client, provider endpoints, the optional
//! backend override, the stub used for unrecognized models, the cancellation
//! handle, and an optional event handler. It is constructed once and shared
//! by every node of an engine.

use crate::backend::{Backend, Endpoint, MockBackend, Provider, Providers};
use crate::error::Result;
use crate::events::{emit, Event, EventHandler};
use crate::PipelineError;
use reqwest::Client;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

/// Shared execution context for pipeline runs.
///
/// # Example
///
/// ```
/// use agent_pipeline::ExecCtx;
///
/// let ctx = ExecCtx::builder()
///     .openai_api_key("sk-...")
///     .ollama_url("http://gpu-box:11434")
///     .build()
///     .unwrap();
/// ```
pub struct ExecCtx {
    /// HTTP client (cheap to clone -- uses `Arc` internally).
    pub client: Client,
    /// Endpoints used to construct provider backends.
    pub providers: Providers,
    /// When set, every LLM node uses this backend regardless of its model.
    pub backend: Option<Arc<dyn Backend>>,
    /// Backend bound to models no provider recognizes.
    pub stub: Arc<dyn Backend>,
    /// Reject unrecognized model names instead of falling back to the stub.
    pub strict: bool,
    /// Optional cancellation flag; nodes check it before starting.
    pub cancellation: Option<Arc<AtomicBool>>,
    /// Optional event handler for lifecycle events.
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    /// Create a new builder.
    pub fn builder() -> ExecCtxBuilder {
        ExecCtxBuilder::default()
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Return an error if cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn emit(&self, event: Event) {
        emit(&self.event_handler, event);
    }

    /// Pick the backend for an LLM node.
    ///
    /// The override wins; otherwise the provider is chosen from the model
    /// name. An unrecognized model gets the stub with a warning, or a
    /// [`PipelineError::Config`] in strict mode.
    pub fn backend_for(&self, node_id: &str, model: &str) -> Result<Arc<dyn Backend>> {
        if let Some(ref backend) = self.backend {
            return Ok(backend.clone());
        }
        match Provider::for_model(model) {
            Some(provider) => {
                tracing::debug!(node = node_id, model, %provider, "selected provider backend");
                Ok(self.providers.backend(provider))
            }
            None if self.strict => Err(PipelineError::Config(format!(
                "Node {} uses model '{}' which matches no known provider",
                node_id, model
            ))),
            None => {
                tracing::warn!(
                    node = node_id,
                    model,
                    "no provider matches model; using the mock LLM backend"
                );
                self.emit(Event::StubBackend {
                    node_id: node_id.to_string(),
                    model: model.to_string(),
                });
                Ok(self.stub.clone())
            }
        }
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("providers", &self.providers)
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("stub", &self.stub.name())
            .field("strict", &self.strict)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`ExecCtx`].
#[derive(Default)]
pub struct ExecCtxBuilder {
    client: Option<Client>,
    providers: Providers,
    backend: Option<Arc<dyn Backend>>,
    stub: Option<Arc<dyn Backend>>,
    strict: bool,
    cancellation: Option<Arc<AtomicBool>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    timeout: Option<Duration>,
}

impl ExecCtxBuilder {
    /// Set the HTTP client. If not set, a default client is created.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Use `backend` for every LLM node, bypassing model-based selection.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replace the stub bound to unrecognized models.
    pub fn stub(mut self, stub: Arc<dyn Backend>) -> Self {
        self.stub = Some(stub);
        self
    }

    /// Fail the build when a model matches no provider.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn openai_url(mut self, url: impl Into<String>) -> Self {
        self.providers.openai = Endpoint {
            base_url: crate::backend::normalize_base_url(&url.into()),
            ..self.providers.openai
        };
        self
    }

    pub fn openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.providers.openai.api_key = Some(key.into());
        self
    }

    /// Sent as `OpenAI-Organization` on OpenAI requests.
    pub fn openai_organization(mut self, org: impl Into<String>) -> Self {
        self.providers.openai.organization = Some(org.into());
        self
    }

    pub fn anthropic_url(mut self, url: impl Into<String>) -> Self {
        self.providers.anthropic = Endpoint {
            base_url: crate::backend::normalize_base_url(&url.into()),
            ..self.providers.anthropic
        };
        self
    }

    pub fn anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.providers.anthropic.api_key = Some(key.into());
        self
    }

    pub fn ollama_url(mut self, url: impl Into<String>) -> Self {
        self.providers.ollama = Endpoint::new(url);
        self
    }

    /// Read provider endpoints and keys from the process environment.
    ///
    /// Recognized: `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OPENAI_ORG_ID`,
    /// `ANTHROPIC_API_KEY`, `ANTHROPIC_BASE_URL`, `OLLAMA_HOST`. Unset or
    /// empty variables leave the current value alone.
    pub fn from_env(self) -> Self {
        self.with_lookup(|key| std::env::var(key).ok())
    }

    fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get("OPENAI_BASE_URL") {
            self = self.openai_url(url);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self = self.openai_api_key(key);
        }
        if let Some(org) = get("OPENAI_ORG_ID") {
            self = self.openai_organization(org);
        }
        if let Some(url) = get("ANTHROPIC_BASE_URL") {
            self = self.anthropic_url(url);
        }
        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self = self.anthropic_api_key(key);
        }
        if let Some(host) = get("OLLAMA_HOST") {
            let host = if host.starts_with("http://") || host.starts_with("https://") {
                host
            } else {
                format!("http://{}", host)
            };
            self = self.ollama_url(host);
        }
        self
    }

    /// Set the cancellation flag.
    pub fn cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancellation = Some(cancel);
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Set the request timeout. Default: 60 seconds.
    ///
    /// Ignored when a custom `Client` is provided via `.client()`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the execution context.
    pub fn build(self) -> Result<ExecCtx> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .timeout(self.timeout.unwrap_or(Duration::from_secs(60)))
                .build()?,
        };
        Ok(ExecCtx {
            client,
            providers: self.providers,
            backend: self.backend,
            stub: self.stub.unwrap_or_else(|| Arc::new(MockBackend::stub())),
            strict: self.strict,
            cancellation: self.cancellation,
            event_handler: self.event_handler,
        })
    }
}
