//! Streaming backend for OpenAI-compatible `/completions` servers
//! (vLLM, llama.cpp server, TGI, ...).

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use tracing::{debug, warn};

use super::sse::{SseDecoder, SseEvent};
use super::{InferenceRequest, InferenceSession, ModelBackend, TokenStream};
use crate::config::BackendConfig;
use crate::errors::{GenerationError, GenerationResult};

/// Most OpenAI-compatible servers reject more stop sequences than this.
const MAX_STOP_SEQUENCES: usize = 4;

pub struct OpenAiStreamBackend {
    config: BackendConfig,
}

impl OpenAiStreamBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelBackend for OpenAiStreamBackend {
    fn name(&self) -> &str {
        "openai_stream"
    }

    async fn load(&self) -> GenerationResult<Box<dyn InferenceSession>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .build()
            .map_err(|e| GenerationError::Configuration(format!("http client: {e}")))?;
        let url = format!("{}/completions", self.config.base_url.trim_end_matches('/'));
        debug!(url = %url, model = %self.config.model, "Streaming session ready");
        Ok(Box::new(OpenAiStreamSession {
            client,
            url,
            model: self.config.model.clone(),
            api_key: self.config.api_key.clone(),
            temperature: self.config.temperature,
        }))
    }
}

struct OpenAiStreamSession {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f64,
}

struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<GenerationResult<String>>,
    finished: bool,
}

impl SseState {
    fn absorb(&mut self, events: Vec<SseEvent>) {
        for event in events {
            if self.finished {
                break;
            }
            match event {
                SseEvent::Text(text) => self.pending.push_back(Ok(text)),
                SseEvent::Done => self.finished = true,
                SseEvent::Error(message) => {
                    self.pending.push_back(Err(GenerationError::Stream(message)));
                    self.finished = true;
                }
            }
        }
    }
}

#[async_trait]
impl InferenceSession for OpenAiStreamSession {
    async fn infer(&self, request: &InferenceRequest) -> GenerationResult<TokenStream> {
        let mut body = json!({
            "model": self.model,
            "prompt": request.prompt,
            "temperature": self.temperature,
            "stream": true,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !request.stop.is_empty() {
            let stop: Vec<&String> = request.stop.iter().take(MAX_STOP_SEQUENCES).collect();
            body["stop"] = json!(stop);
        }

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "Completion request rejected");
            return Err(GenerationError::Backend(format!("HTTP {status}: {text}")));
        }

        let state = SseState {
            bytes: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .boxed(),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        };

        let tokens = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.pending.pop_front() {
                    return Some((item, st));
                }
                if st.finished {
                    return None;
                }
                match st.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let events = st.decoder.push(&chunk);
                        st.absorb(events);
                    }
                    Some(Err(e)) => {
                        st.finished = true;
                        return Some((Err(GenerationError::Stream(e.to_string())), st));
                    }
                    None => {
                        let events = st.decoder.finish();
                        st.absorb(events);
                        st.finished = true;
                    }
                }
            }
        });

        Ok(tokens.boxed())
    }
}
