//! Backend for Ollama's native API.
//!
//! Uses `/api/generate` for prompt-only requests and `/api/chat` when a
//! system prompt is present.

use super::{connect_error, error_for_status, Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Backend for a local or remote Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    base_url: String,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: super::normalize_base_url(&base_url.into()),
        }
    }

    fn build_options(request: &LlmRequest) -> Value {
        let mut opts = json!({ "temperature": request.temperature });
        if let Some(max) = request.max_tokens {
            opts["num_predict"] = json!(max);
        }
        opts
    }

    fn use_chat(request: &LlmRequest) -> bool {
        request
            .system_prompt
            .as_ref()
            .is_some_and(|s| !s.is_empty())
    }

    /// Build the JSON body for `/api/generate`.
    fn build_generate_body(request: &LlmRequest) -> Value {
        json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": Self::build_options(request),
        })
    }

    /// Build the JSON body for `/api/chat`.
    fn build_chat_body(request: &LlmRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(ref sys) = request.system_prompt {
            messages.push(json!({"role": "system", "content": sys}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
            "options": Self::build_options(request),
        })
    }

    fn extract_metadata(json_resp: &Value) -> Option<Value> {
        let mut meta = serde_json::Map::new();
        for key in [
            "total_duration",
            "eval_count",
            "eval_duration",
            "prompt_eval_count",
            "model",
        ] {
            if let Some(v) = json_resp.get(key) {
                meta.insert(key.into(), v.clone());
            }
        }
        (!meta.is_empty()).then_some(Value::Object(meta))
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn complete(&self, client: &Client, request: &LlmRequest) -> Result<LlmResponse> {
        let chat = Self::use_chat(request);
        let (url, body) = if chat {
            (
                format!("{}/api/chat", self.base_url),
                Self::build_chat_body(request),
            )
        } else {
            (
                format!("{}/api/generate", self.base_url),
                Self::build_generate_body(request),
            )
        };

        let resp = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| connect_error(&url, e))?;
        let resp = error_for_status(resp).await?;
        let status = resp.status().as_u16();
        let json_resp: Value = resp.json().await?;

        let content = if chat {
            json_resp.get("message").and_then(|m| m.get("content"))
        } else {
            json_resp.get("response")
        };
        let text = content.and_then(|v| v.as_str()).unwrap_or("").to_string();

        Ok(LlmResponse {
            text,
            status,
            metadata: Self::extract_metadata(&json_resp),
        })
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_body_without_system_prompt() {
        let request = LlmRequest::new("llama3.2:3b", "hello", 0.2);
        assert!(!OllamaBackend::use_chat(&request));

        let body = OllamaBackend::build_generate_body(&request);
        assert_eq!(body["model"], "llama3.2:3b");
        assert_eq!(body["prompt"], "hello");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["temperature"], 0.2);
        assert!(body["options"].get("num_predict").is_none());
    }

    #[test]
    fn chat_body_with_system_prompt() {
        let mut request = LlmRequest::new("llama3.2:3b", "hello", 0.7);
        request.system_prompt = Some("Be brief.".into());
        request.max_tokens = Some(64);
        assert!(OllamaBackend::use_chat(&request));

        let body = OllamaBackend::build_chat_body(&request);
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hello");
        assert_eq!(body["options"]["num_predict"], 64);
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(
            OllamaBackend::new("http://localhost:11434/api/").base_url,
            "http://localhost:11434"
        );
    }

    #[test]
    fn metadata_keeps_known_fields() {
        let meta = OllamaBackend::extract_metadata(&json!({"eval_count": 12, "done": true}))
            .expect("metadata");
        assert_eq!(meta, json!({"eval_count": 12}));
    }
}
