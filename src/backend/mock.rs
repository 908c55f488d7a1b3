//! Mock backend for running pipelines without a live LLM.
//!
//! [`MockBackend`] returns pre-configured responses in order. It also serves
//! as the stub for model names no provider recognizes.
//!
//! # Example
//!
//! ```
//! use agent_pipeline::backend::MockBackend;
//!
//! let mock = MockBackend::new(vec!["Hello, world!".to_string()]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, LlmRequest, LlmResponse, STUB_RESPONSE};
use crate::error::Result;

/// A backend that returns canned responses in order.
///
/// Cycles back to the beginning when all responses have been consumed.
/// Every request it receives is recorded; see [`requests`](Self::requests).
#[derive(Debug)]
pub struct MockBackend {
    responses: Vec<String>,
    index: AtomicUsize,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockBackend {
    /// Create a mock backend with the given canned responses.
    ///
    /// Responses are returned in order. When exhausted, cycles from the
    /// beginning. An empty list behaves like [`stub`](Self::stub).
    pub fn new(responses: Vec<String>) -> Self {
        let responses = if responses.is_empty() {
            vec![STUB_RESPONSE.to_string()]
        } else {
            responses
        };
        Self {
            responses,
            index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// The deterministic stand-in used for unrecognized models.
    pub fn stub() -> Self {
        Self::fixed(STUB_RESPONSE)
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// The user prompt of each request received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.prompt).collect()
    }

    fn next_response(&self) -> String {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.responses.len();
        self.responses[idx].clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(&self, _client: &Client, request: &LlmRequest) -> Result<LlmResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        Ok(LlmResponse {
            text: self.next_response(),
            status: 200,
            metadata: None,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> LlmRequest {
        LlmRequest::new("test", prompt, 0.7)
    }

    #[tokio::test]
    async fn test_mock_fixed_response() {
        let mock = MockBackend::fixed("Hello!");
        let client = Client::new();
        let resp = mock.complete(&client, &request("hi")).await.unwrap();
        assert_eq!(resp.text, "Hello!");
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn test_mock_cycles_responses() {
        let mock = MockBackend::new(vec!["first".into(), "second".into()]);
        let client = Client::new();
        let r1 = mock.complete(&client, &request("a")).await.unwrap();
        let r2 = mock.complete(&client, &request("b")).await.unwrap();
        let r3 = mock.complete(&client, &request("c")).await.unwrap();
        assert_eq!(r1.text, "first");
        assert_eq!(r2.text, "second");
        assert_eq!(r3.text, "first"); // cycles
        assert_eq!(mock.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_stub_and_empty_list() {
        let client = Client::new();
        let stub = MockBackend::stub();
        let empty = MockBackend::new(Vec::new());
        assert_eq!(stub.complete(&client, &request("x")).await.unwrap().text, STUB_RESPONSE);
        assert_eq!(empty.complete(&client, &request("x")).await.unwrap().text, STUB_RESPONSE);
    }
}
