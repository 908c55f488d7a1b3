//! Backend for Anthropic's Messages API.
//!
//! Endpoint: `/v1/messages`. Authentication via the `x-api-key` header, and
//! every request carries an `anthropic-version` header.

use super::{
    connect_error, error_for_status, redact, Backend, LlmRequest, LlmResponse, DEFAULT_MAX_TOKENS,
};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// API version sent with every request.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Backend for Claude models.
#[derive(Clone)]
pub struct AnthropicBackend {
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_deref().map(redact))
            .finish()
    }
}

impl AnthropicBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: super::normalize_base_url(&base_url.into()),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Build the request body for `/v1/messages`.
    ///
    /// The system prompt is a top-level field, not a message.
    fn build_body(request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(ref sys) = request.system_prompt {
            if !sys.is_empty() {
                body["system"] = json!(sys);
            }
        }
        body
    }

    fn build_http_request(
        &self,
        client: &Client,
        url: &str,
        body: &Value,
    ) -> reqwest::RequestBuilder {
        let mut req = client
            .post(url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);
        if let Some(ref key) = self.api_key {
            req = req.header("x-api-key", key.as_str());
        }
        req
    }

    /// Concatenate the text blocks of a Messages API response.
    fn extract_text(json_resp: &Value) -> String {
        json_resp
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn extract_metadata(json_resp: &Value) -> Option<Value> {
        let mut meta = serde_json::Map::new();
        for key in ["usage", "model", "id", "stop_reason"] {
            if let Some(v) = json_resp.get(key) {
                meta.insert(key.into(), v.clone());
            }
        }
        (!meta.is_empty()).then_some(Value::Object(meta))
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    async fn complete(&self, client: &Client, request: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(request);

        let resp = self
            .build_http_request(client, &url, &body)
            .send()
            .await
            .map_err(|e| connect_error(&url, e))?;
        let resp = error_for_status(resp).await?;
        let status = resp.status().as_u16();
        let json_resp: Value = resp.json().await?;

        Ok(LlmResponse {
            text: Self::extract_text(&json_resp),
            status,
            metadata: Self::extract_metadata(&json_resp),
        })
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}
