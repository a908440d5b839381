// File: src/providers/http.rs
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::transcript::TranscriptLogger;
use super::{CompletionRequest, CompletionService};
use crate::core::config::CompletionConfig;
use crate::core::error::CompletionError;

/// Completion service speaking the OpenAI-style `/chat/completions` protocol.
/// Works against OpenAI, OpenRouter, Ollama, vLLM and llama.cpp servers.
pub struct HttpCompletionService {
    client: Client,
    api_key: Option<String>,
    transcript: Option<Arc<TranscriptLogger>>,
}

impl HttpCompletionService {
    pub fn new(config: &CompletionConfig) -> Result<Self, CompletionError> {
        // Deadlines are enforced per call by the retry layer; this is only a backstop
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| CompletionError::transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.resolved_api_key(),
            transcript: None,
        })
    }

    pub fn with_transcript(mut self, logger: Arc<TranscriptLogger>) -> Self {
        self.transcript = Some(logger);
        self
    }

    fn build_url(endpoint: &str) -> String {
        format!("{}/chat/completions", endpoint.trim_end_matches('/'))
    }

    fn build_payload(req: &CompletionRequest) -> JsonValue {
        let messages: Vec<JsonValue> = req
            .messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        json!({
            "model": req.model,
            "messages": messages,
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "stream": false,
        })
    }

    /// Pull `choices[0].message.content` out of a response body
    fn extract_content(body: &JsonValue) -> Result<String, CompletionError> {
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| CompletionError::protocol("response has no choices[0].message.content"))
    }

    fn log_transcript(&self, f: impl FnOnce(&TranscriptLogger) -> anyhow::Result<()>) {
        if let Some(logger) = &self.transcript {
            if let Err(e) = f(logger) {
                warn!("Failed to write completion transcript: {}", e);
            }
        }
    }
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    async fn complete(&self, req: &CompletionRequest) -> Result<String, CompletionError> {
        let url = Self::build_url(&req.endpoint);
        let payload = Self::build_payload(req);

        self.log_transcript(|t| t.log_request(&req.model, &req.user_text()));
        let start = Instant::now();

        let mut rb = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            rb = rb.header("Authorization", format!("Bearer {}", key));
        }

        let resp = rb
            .json(&payload)
            .send()
            .await
            .map_err(|e| CompletionError::transport(format!("request to {} failed: {}", url, e)))?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| {
            CompletionError::transport(format!("failed reading response body: {}", e))
        })?;

        if !(200..300).contains(&status) {
            return Err(CompletionError::Transport {
                message: format!("{} returned {}: {}", url, status, text),
                status: Some(status),
            });
        }

        let body: JsonValue = serde_json::from_str(&text)
            .map_err(|e| CompletionError::protocol(format!("invalid JSON body: {}", e)))?;
        let content = Self::extract_content(&body)?;

        let duration = start.elapsed().as_millis() as u64;
        debug!("Model '{}' answered in {}ms", req.model, duration);
        self.log_transcript(|t| t.log_response(&req.model, &content, duration));

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Message;

    #[test]
    fn test_url_joins_without_double_slash() {
        assert_eq!(
            HttpCompletionService::build_url("http://host/v1/"),
            "http://host/v1/chat/completions"
        );
    }

    #[test]
    fn test_payload_shape() {
        let req = CompletionRequest {
            endpoint: "http://host".into(),
            model: "tiny".into(),
            messages: vec![Message::system("sys"), Message::user("hi")],
            temperature: 0.2,
            max_tokens: 64,
            stream: false,
        };
        let payload = HttpCompletionService::build_payload(&req);
        assert_eq!(payload["model"], "tiny");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "hi");
        assert_eq!(payload["max_tokens"], 64);
        assert_eq!(payload["stream"], false);
    }

    #[test]
    fn test_extract_content_errors_on_missing_choices() {
        let err = HttpCompletionService::extract_content(&json!({"id": "x"})).unwrap_err();
        assert!(matches!(err, CompletionError::Protocol { .. }));

        let ok = HttpCompletionService::extract_content(
            &json!({"choices": [{"message": {"role": "assistant", "content": "hey"}}]}),
        )
        .unwrap();
        assert_eq!(ok, "hey");
    }
}
