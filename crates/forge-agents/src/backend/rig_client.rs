//! One-shot backend through rig's OpenAI-compatible completions client.
//!
//! rig returns the whole completion at once, so the stream carries a single
//! fragment. Stop sequences and the token ceiling are passed as additional
//! request parameters.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use serde_json::json;
use tracing::debug;

use super::{InferenceRequest, InferenceSession, ModelBackend, TokenStream};
use crate::config::BackendConfig;
use crate::errors::{GenerationError, GenerationResult};

pub struct RigBackend {
    config: BackendConfig,
}

impl RigBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelBackend for RigBackend {
    fn name(&self) -> &str {
        "rig"
    }

    async fn load(&self) -> GenerationResult<Box<dyn InferenceSession>> {
        let client = openai::CompletionsClient::builder()
            .api_key(&self.config.api_key)
            .base_url(&self.config.base_url)
            .build()
            .map_err(|e| GenerationError::Configuration(format!("rig client: {e}")))?;
        debug!(base_url = %self.config.base_url, model = %self.config.model, "Rig session ready");
        Ok(Box::new(RigSession {
            client,
            model: self.config.model.clone(),
            temperature: self.config.temperature,
        }))
    }
}

struct RigSession {
    client: openai::CompletionsClient,
    model: String,
    temperature: f64,
}

#[async_trait]
impl InferenceSession for RigSession {
    async fn infer(&self, request: &InferenceRequest) -> GenerationResult<TokenStream> {
        let mut params = json!({});
        if let Some(max_tokens) = request.max_tokens {
            params["max_tokens"] = json!(max_tokens);
        }
        if !request.stop.is_empty() {
            params["stop"] = json!(request.stop);
        }

        let agent = self
            .client
            .agent(&self.model)
            .temperature(self.temperature)
            .additional_params(params)
            .build();

        let text: String = agent
            .prompt(request.prompt.as_str())
            .await
            .map_err(|e| GenerationError::Backend(e.to_string()))?;

        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}
