use log::warn;
use std::sync::Arc;

use super::{CompletionRequest, CompletionService, Message};
use crate::core::config::CompletionConfig;
use crate::core::error::CompletionError;

/// Where the secondary attempt of a consensus sub-agent goes
#[derive(Debug, Clone)]
struct FallbackTarget {
    endpoint: String,
    model: String,
}

/// A completion service bound to its endpoint, model and sampling settings.
/// Cheap to clone; detached tasks take their own copy.
#[derive(Clone)]
pub struct Llm {
    service: Arc<dyn CompletionService>,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    fallback: Option<FallbackTarget>,
}

impl Llm {
    pub fn new(service: Arc<dyn CompletionService>, config: &CompletionConfig) -> Self {
        let fallback = config.fallback.as_ref().map(|f| FallbackTarget {
            endpoint: f
                .endpoint
                .clone()
                .unwrap_or_else(|| config.endpoint.clone()),
            model: f.model.clone(),
        });

        Self {
            service,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            fallback,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build a request against an explicit endpoint/model
    pub fn request_for(
        &self,
        endpoint: &str,
        model: &str,
        system: &str,
        user: &str,
    ) -> CompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(user));

        CompletionRequest {
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        }
    }

    /// Ask the configured model
    pub async fn ask(&self, system: &str, user: &str) -> Result<String, CompletionError> {
        let req = self.request_for(&self.endpoint, &self.model, system, user);
        self.service.complete(&req).await
    }

    /// Ask a specific endpoint/model
    pub async fn ask_model(
        &self,
        endpoint: &str,
        model: &str,
        system: &str,
        user: &str,
    ) -> Result<String, CompletionError> {
        let req = self.request_for(endpoint, model, system, user);
        self.service.complete(&req).await
    }

    /// Ask a specific endpoint/model and, on failure, try the secondary
    /// target exactly once before giving up
    pub async fn ask_with_fallback(
        &self,
        endpoint: &str,
        model: &str,
        system: &str,
        user: &str,
    ) -> Result<String, CompletionError> {
        match self.ask_model(endpoint, model, system, user).await {
            Ok(text) => Ok(text),
            Err(err) => match &self.fallback {
                Some(fb) => {
                    warn!(
                        "Model '{}' failed ({}), falling back to '{}'",
                        model, err, fb.model
                    );
                    self.ask_model(&fb.endpoint, &fb.model, system, user).await
                }
                None => Err(err),
            },
        }
    }
}
