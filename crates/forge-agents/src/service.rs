//! Top-level request service over a shared generation engine.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::engine::GenerationEngine;
use crate::errors::{GenerationError, GenerationResult};

/// Answer to one `ask`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum Reply {
    Answer(String),
    /// Another request holds the engine; try again later.
    Busy,
}

/// Fail-fast front door: callers are answered `Busy` instead of queuing
/// behind a long generation.
#[derive(Clone)]
pub struct ForgeService {
    engine: Arc<GenerationEngine>,
    busy_timeout: Duration,
}

impl ForgeService {
    pub fn new(engine: Arc<GenerationEngine>) -> Self {
        let busy_timeout = engine.config().busy_timeout();
        Self {
            engine,
            busy_timeout,
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<GenerationEngine> {
        &self.engine
    }

    pub async fn ask(&self, prompt: &str) -> GenerationResult<Reply> {
        match self.engine.try_generate(prompt, self.busy_timeout).await {
            Ok(text) => Ok(Reply::Answer(text)),
            Err(GenerationError::Busy) => {
                info!("Engine busy, answering without queuing");
                Ok(Reply::Busy)
            }
            Err(e) => Err(e),
        }
    }
}
