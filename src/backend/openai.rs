//! OpenAI chat completions, and servers that speak the same protocol
//! (vLLM, llama.cpp server, LM Studio, Groq).
//!
//! Selected for models whose name contains "gpt" or "openai". Requests are
//! non-streaming `POST {base_url}/v1/chat/completions`.

use super::{connect_error, error_for_status, redact, Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Backend for any OpenAI-compatible API.
///
/// ```
/// use agent_pipeline::backend::OpenAiBackend;
///
/// let backend = OpenAiBackend::new("https://api.openai.com").with_api_key("sk-...");
/// ```
#[derive(Clone)]
pub struct OpenAiBackend {
    base_url: String,
    api_key: Option<String>,
    organization: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn from_request(request: &'a LlmRequest) -> Self {
        let system = request
            .system_prompt
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|content| ChatMessage {
                role: "system",
                content,
            });
        let user = ChatMessage {
            role: "user",
            content: &request.prompt,
        };

        Self {
            model: &request.model,
            messages: system.into_iter().chain(std::iter::once(user)).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_parts(self) -> (String, Option<Value>) {
        let text = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let meta: Map<String, Value> = self
            .rest
            .into_iter()
            .filter(|(k, _)| matches!(k.as_str(), "id" | "model" | "usage"))
            .collect();
        (text, (!meta.is_empty()).then_some(Value::Object(meta)))
    }
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_deref().map(redact))
            .field("organization", &self.organization)
            .finish()
    }
}

impl OpenAiBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: super::normalize_base_url(&base_url.into()),
            api_key: None,
            organization: None,
        }
    }

    /// Sent as a bearer token.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sent as `OpenAI-Organization`.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn post(&self, client: &Client, body: &ChatRequest<'_>) -> reqwest::RequestBuilder {
        let mut req = client.post(self.url()).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(org) = &self.organization {
            req = req.header("OpenAI-Organization", org);
        }
        req
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(&self, client: &Client, request: &LlmRequest) -> Result<LlmResponse> {
        let body = ChatRequest::from_request(request);
        let resp = self
            .post(client, &body)
            .send()
            .await
            .map_err(|e| connect_error(&self.url(), e))?;
        let resp = error_for_status(resp).await?;
        let status = resp.status().as_u16();

        let (text, metadata) = resp.json::<ChatResponse>().await?.into_parts();
        Ok(LlmResponse {
            text,
            status,
            metadata,
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> LlmRequest {
        LlmRequest::new("gpt-4o-mini", "Tell me a joke about owls", 0.9)
    }

    #[test]
    fn body_carries_model_temperature_and_user_message() {
        let req = request();
        let body = serde_json::to_value(ChatRequest::from_request(&req)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "Tell me a joke about owls"}],
                "temperature": 0.9,
                "stream": false,
            })
        );
    }

    #[test]
    fn system_prompt_and_max_tokens_are_included_when_set() {
        let mut req = request();
        req.system_prompt = Some("You are a comedian.".into());
        req.max_tokens = Some(256);

        let body = serde_json::to_value(ChatRequest::from_request(&req)).unwrap();
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");

        req.system_prompt = Some(String::new());
        let body = serde_json::to_value(ChatRequest::from_request(&req)).unwrap();
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn headers_follow_configuration() {
        let client = Client::new();
        let req = request();
        let body = ChatRequest::from_request(&req);

        let backend = OpenAiBackend::new("https://api.openai.com/v1")
            .with_api_key("sk-test123")
            .with_organization("org-abc");
        let built = backend.post(&client, &body).build().unwrap();
        assert_eq!(built.url().as_str(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(built.headers()["Authorization"], "Bearer sk-test123");
        assert_eq!(built.headers()["OpenAI-Organization"], "org-abc");

        let anonymous = OpenAiBackend::new("http://localhost:8000");
        assert!(!anonymous.has_api_key());
        let built = anonymous.post(&client, &body).build().unwrap();
        assert!(built.headers().get("Authorization").is_none());
    }

    #[test]
    fn response_text_and_metadata() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "gpt-4o-mini",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hoot."}}],
            "usage": {"total_tokens": 9}
        }))
        .unwrap();
        let (text, meta) = resp.into_parts();
        assert_eq!(text, "Hoot.");
        let meta = meta.unwrap();
        assert_eq!(meta["usage"]["total_tokens"], 9);
        assert!(meta.get("object").is_none());

        let empty: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert_eq!(empty.into_parts(), (String::new(), None));
    }

    #[test]
    fn debug_redacts_api_key() {
        let backend = OpenAiBackend::new("https://api.openai.com").with_api_key("sk-1234567890abcdef");
        let debug = format!("{:?}", backend);
        assert!(!debug.contains("1234567890abcdef"));
    }
}
