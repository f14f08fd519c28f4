//! Model backends: the opaque "given a prompt, stream text" capability.
//!
//! A `ModelBackend` loads an `InferenceSession`; the generation engine owns
//! exactly one session for its lifetime and sends every request through it.
//!
//! | Backend                | Transport                                   |
//! |------------------------|---------------------------------------------|
//! | `OpenAiStreamBackend`  | reqwest, `/completions` with `stream: true` |
//! | `RigBackend`           | rig-core completions client, one fragment   |

pub mod openai;
pub mod rig_client;
mod sse;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::config::{BackendConfig, BackendKind};
use crate::errors::GenerationResult;

pub use openai::OpenAiStreamBackend;
pub use rig_client::RigBackend;
pub use sse::{SseDecoder, SseEvent};

/// Stream of text fragments for one inference call.
pub type TokenStream = Pin<Box<dyn Stream<Item = GenerationResult<String>> + Send>>;

/// Parameters of one inference call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceRequest {
    pub prompt: String,
    /// `None` leaves the ceiling to the backend.
    pub max_tokens: Option<usize>,
    pub stop: Vec<String>,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }
}

/// A loaded model session. Holds no state beyond one `infer` call.
#[async_trait]
pub trait InferenceSession: Send + Sync {
    async fn infer(&self, request: &InferenceRequest) -> GenerationResult<TokenStream>;

    /// Release backend resources. Default is a no-op.
    async fn close(&self) {}
}

/// Factory for inference sessions.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> GenerationResult<Box<dyn InferenceSession>>;
}

/// Build the configured backend.
pub fn from_config(config: &BackendConfig) -> Arc<dyn ModelBackend> {
    match config.kind {
        BackendKind::OpenaiStream => Arc::new(OpenAiStreamBackend::new(config.clone())),
        BackendKind::Rig => Arc::new(RigBackend::new(config.clone())),
    }
}
