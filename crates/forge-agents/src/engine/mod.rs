//! Generation engine: one long-lived model session behind a single-flight
//! admission lock, a guarded status machine, and retry with back-off.
//!
//! Request flow:
//!
//! 1. Admission: wait on a one-permit FIFO semaphore (or fail fast with
//!    `Busy` on the short-timeout path). A shut-down engine closes the
//!    semaphore and every waiter gets `Disposed`.
//! 2. The prompt is appended to the conversation as a user turn.
//! 3. Each attempt enters `Processing` (reinitializing the session first if
//!    the previous request left the engine in `Error`), renders the
//!    conversation, drains the token stream through a [`StreamMonitor`], and
//!    cleans the raw reply.
//! 4. Success records the assistant turn; failure drops the dangling user
//!    turn so it is not replayed.

pub mod cleanup;
pub mod retry;
pub mod status;
pub mod stream;
pub mod structured;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use forge_coordination::conversation::ConversationContext;
use forge_coordination::events::SharedEventBus;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{InferenceRequest, InferenceSession, ModelBackend};
use crate::config::EngineConfig;
use crate::errors::{GenerationError, GenerationResult};
use crate::prompts;

pub use cleanup::ResponseCleaner;
pub use retry::RetryPolicy;
pub use status::{ExecutorStatus, IllegalTransition, StatusMachine, TransitionRecord};
pub use stream::{StopReason, StreamControl, StreamMonitor, StreamSummary};
pub use structured::{extract_json, interpret_boolean, parse_json};

/// Result of one successful generation request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub text: String,
    pub tokens: usize,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub tokens_per_sec: f64,
    pub stop_reason: StopReason,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Stateful wrapper around a single model session.
///
/// Share it behind an `Arc`; concurrent callers queue on the admission lock
/// in arrival order.
pub struct GenerationEngine {
    backend: Arc<dyn ModelBackend>,
    config: EngineConfig,
    session: Mutex<Option<Arc<dyn InferenceSession>>>,
    status: Mutex<StatusMachine>,
    context: Mutex<ConversationContext>,
    admission: Semaphore,
    shutdown: CancellationToken,
    retry: RetryPolicy,
    cleaner: ResponseCleaner,
    bus: Option<SharedEventBus>,
}

impl GenerationEngine {
    /// Load a session from `backend` and return a ready engine.
    pub async fn open(
        backend: Arc<dyn ModelBackend>,
        config: EngineConfig,
        bus: Option<SharedEventBus>,
    ) -> GenerationResult<Self> {
        if config.context_limit == 0 {
            return Err(GenerationError::Configuration(
                "context_limit must be at least 1".into(),
            ));
        }
        let cleaner = ResponseCleaner::new(&config.markers, &config.stop_markers())?;
        let session = backend.load().await?;
        info!(backend = backend.name(), "Model session loaded");

        let context = ConversationContext::new(config.context_limit)
            .with_system_instruction(config.system_instruction.clone())
            .with_markers(config.markers.clone());

        Ok(Self {
            retry: RetryPolicy::from_config(&config.retry),
            session: Mutex::new(Some(Arc::from(session))),
            status: Mutex::new(StatusMachine::new()),
            context: Mutex::new(context),
            admission: Semaphore::new(1),
            shutdown: CancellationToken::new(),
            backend,
            config,
            cleaner,
            bus,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> ExecutorStatus {
        lock(&self.status).current()
    }

    pub fn transitions(&self) -> Vec<TransitionRecord> {
        lock(&self.status).transitions().cloned().collect()
    }

    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Retained conversation entries.
    pub fn history_len(&self) -> usize {
        lock(&self.context).len()
    }

    pub fn export_debug_trail(&self) -> GenerationResult<String> {
        lock(&self.context)
            .export_debug_trail()
            .map_err(|e| GenerationError::Internal(e.into()))
    }

    pub async fn generate(&self, prompt: &str) -> GenerationResult<String> {
        self.generate_with_cancel(prompt, &CancellationToken::new())
            .await
    }

    pub async fn generate_with_cancel(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> GenerationResult<String> {
        self.generate_detailed(prompt, cancel)
            .await
            .map(|outcome| outcome.text)
    }

    /// Queue for the session and run the request to completion.
    pub async fn generate_detailed(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> GenerationResult<GenerationOutcome> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            permit = self.admit() => permit?,
        };
        self.run_admitted(prompt, cancel).await
    }

    /// Fail-fast variant: returns `Busy` if admission takes longer than
    /// `timeout`.
    pub async fn try_generate(&self, prompt: &str, timeout: Duration) -> GenerationResult<String> {
        let _permit = match tokio::time::timeout(timeout, self.admit()).await {
            Ok(permit) => permit?,
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "Engine busy, not queuing");
                return Err(GenerationError::Busy);
            }
        };
        self.run_admitted(prompt, &CancellationToken::new())
            .await
            .map(|outcome| outcome.text)
    }

    /// Ask a yes/no question.
    pub async fn generate_boolean(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> GenerationResult<bool> {
        let reply = self
            .generate_with_cancel(&prompts::yes_no(question), cancel)
            .await?;
        Ok(interpret_boolean(&reply))
    }

    /// Generate JSON and deserialize it into `T`.
    ///
    /// A reply that does not parse gets exactly one corrective re-prompt
    /// carrying the previous output and the parse error.
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> GenerationResult<T> {
        let output = self.generate_with_cancel(prompt, cancel).await?;
        let error = match parse_json::<T>(&output) {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        warn!(error = %error, "Structured output did not parse, re-prompting once");
        let corrective = prompts::corrective_json(prompt, &output, &error);
        let output = self.generate_with_cancel(&corrective, cancel).await?;
        parse_json::<T>(&output).map_err(GenerationError::ParseFailure)
    }

    /// Release the session and reject all further requests.
    ///
    /// Queued callers wake with `Disposed`; an in-flight request is aborted.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.admission.close();
        let session = lock(&self.session).take();
        if let Some(session) = session {
            session.close().await;
        }
        info!(backend = self.backend.name(), "Generation engine shut down");
    }

    async fn admit(&self) -> GenerationResult<SemaphorePermit<'_>> {
        if self.shutdown.is_cancelled() {
            return Err(GenerationError::Disposed);
        }
        self.admission
            .acquire()
            .await
            .map_err(|_| GenerationError::Disposed)
    }

    async fn run_admitted(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> GenerationResult<GenerationOutcome> {
        lock(&self.context).add_user_turn(prompt);

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(GenerationError::Disposed),
            result = self.retry.run(cancel, |attempt| self.attempt(attempt, cancel)) => result,
        };

        match &result {
            Ok(outcome) => {
                lock(&self.context).add_assistant_turn(outcome.text.clone());
                debug!(
                    tokens = outcome.tokens,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    stop_reason = ?outcome.stop_reason,
                    "Generation complete"
                );
            }
            Err(e) => {
                lock(&self.context).discard_pending_user_turn();
                // An aborted attempt future never reached its own transition.
                if self.status() == ExecutorStatus::Processing {
                    self.transition(ExecutorStatus::Error, Some("request aborted"));
                }
                warn!(error = %e, "Generation request failed");
            }
        }
        result
    }

    async fn attempt(
        &self,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> GenerationResult<GenerationOutcome> {
        let session = self.enter_processing().await?;
        let prompt = lock(&self.context).build_prompt();
        debug!(attempt, prompt_chars = prompt.len(), "Starting generation attempt");

        let result = self.stream_once(session.as_ref(), prompt, cancel).await;
        match &result {
            Ok(_) => self.transition(ExecutorStatus::Ready, None),
            Err(e) => self.transition(ExecutorStatus::Error, Some(&e.to_string())),
        }
        result
    }

    /// Move to `Processing`, reinitializing first if the engine is in `Error`.
    ///
    /// A failed reinitialization leaves the engine in `Error`.
    async fn enter_processing(&self) -> GenerationResult<Arc<dyn InferenceSession>> {
        if self.status() == ExecutorStatus::Error {
            let stale = lock(&self.session).take();
            if let Some(stale) = stale {
                stale.close().await;
            }
            let fresh = self.backend.load().await.map_err(|e| {
                GenerationError::InvalidState(format!("session reinitialization failed: {e}"))
            })?;
            *lock(&self.session) = Some(Arc::from(fresh));
            self.transition(ExecutorStatus::Processing, Some("session reinitialized"));
        } else {
            self.transition(ExecutorStatus::Processing, None);
        }

        let session = lock(&self.session).clone();
        session.ok_or(GenerationError::Disposed)
    }

    async fn stream_once(
        &self,
        session: &dyn InferenceSession,
        prompt: String,
        cancel: &CancellationToken,
    ) -> GenerationResult<GenerationOutcome> {
        let request = InferenceRequest::new(prompt)
            .with_max_tokens(self.config.token_ceiling())
            .with_stop(self.config.stop_markers());

        let mut tokens = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            stream = session.infer(&request) => stream?,
        };

        let mut monitor = StreamMonitor::new(&self.config, self.bus.clone());
        let stop_reason = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                next = tokens.next() => next,
            };
            match next {
                None => break StopReason::EndOfStream,
                Some(Err(e)) => return Err(e),
                Some(Ok(token)) => {
                    if let StreamControl::Stop(reason) = monitor.push(&token) {
                        break reason;
                    }
                }
            }
        };

        let tokens_per_sec = monitor.tokens_per_sec();
        if monitor.dropped() > 0 {
            debug!(dropped = monitor.dropped(), "Suppressed duplicate tokens");
        }
        let summary = monitor.finish(stop_reason);
        let text = self.cleaner.clean(&summary.text);
        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }

        Ok(GenerationOutcome {
            text,
            tokens: summary.tokens,
            elapsed: summary.elapsed,
            tokens_per_sec,
            stop_reason: summary.stop_reason,
        })
    }

    fn transition(&self, to: ExecutorStatus, reason: Option<&str>) {
        if let Err(e) = lock(&self.status).advance(to, reason) {
            warn!(error = %e, "Ignoring illegal status transition");
        }
    }
}

impl Drop for GenerationEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.admission.close();
    }
}
