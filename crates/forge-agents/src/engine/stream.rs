//! Token-stream monitoring: noise filtering, output buffering, progress,
//! and stop conditions for one generation attempt.

use std::time::Duration;

use chrono::Utc;
use forge_coordination::detection::{DuplicateDetector, RepetitionDetector};
use forge_coordination::events::{ForgeEvent, SharedEventBus};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::EngineConfig;

/// Why the token loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The backend closed the stream.
    EndOfStream,
    /// The configured token ceiling was reached.
    TokenLimit,
    /// A phrase kept recurring.
    Repetition,
    /// A completion marker appeared in the response.
    CompletionMarker(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamControl {
    Continue,
    Stop(StopReason),
}

/// Result of draining a stream through the monitor.
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub text: String,
    pub tokens: usize,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

/// Per-attempt stream state. Created fresh for every attempt.
pub struct StreamMonitor {
    duplicates: DuplicateDetector,
    repetition: RepetitionDetector,
    completion_markers: Vec<String>,
    ceiling: Option<usize>,
    flush_threshold: usize,
    progress_interval: usize,
    response: String,
    buffer: Vec<String>,
    tokens: usize,
    dropped: usize,
    started: Instant,
    bus: Option<SharedEventBus>,
}

impl StreamMonitor {
    pub fn new(config: &EngineConfig, bus: Option<SharedEventBus>) -> Self {
        Self {
            duplicates: DuplicateDetector::new(),
            repetition: RepetitionDetector::new().with_min_chars(config.repetition_min_chars),
            completion_markers: config.stop_markers(),
            ceiling: config.token_ceiling(),
            flush_threshold: config.flush_threshold.max(1),
            progress_interval: config.progress_interval.max(1),
            response: String::new(),
            buffer: Vec::new(),
            tokens: 0,
            dropped: 0,
            started: Instant::now(),
            bus,
        }
    }

    /// Process one streamed token.
    pub fn push(&mut self, token: &str) -> StreamControl {
        if self.duplicates.is_duplicate(token) {
            self.dropped += 1;
            return StreamControl::Continue;
        }

        self.response.push_str(token);
        self.buffer.push(token.to_string());
        self.tokens += 1;

        if self.tokens == 1 || self.tokens % self.progress_interval == 0 {
            self.report_progress();
        }
        if self.buffer.len() >= self.flush_threshold {
            self.flush();
        }

        match self.stop_condition() {
            Some(reason) => StreamControl::Stop(reason),
            None => StreamControl::Continue,
        }
    }

    fn stop_condition(&self) -> Option<StopReason> {
        if self.ceiling.is_some_and(|max| self.tokens >= max) {
            return Some(StopReason::TokenLimit);
        }
        if self.repetition.check(&self.response) {
            return Some(StopReason::Repetition);
        }
        self.completion_markers
            .iter()
            .find(|m| self.response.contains(m.as_str()))
            .map(|m| StopReason::CompletionMarker(m.clone()))
    }

    /// Percent of the token ceiling used; `None` without a ceiling.
    pub fn percent_complete(&self) -> Option<f64> {
        self.ceiling
            .map(|max| (self.tokens as f64 / max as f64 * 100.0).min(100.0))
    }

    pub fn tokens_per_sec(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.tokens as f64 / secs
        } else {
            0.0
        }
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    /// The bus, if anyone is listening.
    fn observers(&self) -> Option<&SharedEventBus> {
        self.bus.as_ref().filter(|bus| bus.has_subscribers())
    }

    fn report_progress(&self) {
        tracing::trace!(tokens = self.tokens, "Generation progress");
        if let Some(bus) = self.observers() {
            bus.emit(ForgeEvent::GenerationProgress {
                tokens: self.tokens,
                percent: self.percent_complete(),
                tokens_per_sec: self.tokens_per_sec(),
                timestamp: Utc::now(),
            });
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text: String = self.buffer.drain(..).collect();
        if let Some(bus) = self.observers() {
            bus.emit(ForgeEvent::OutputChunk {
                text,
                timestamp: Utc::now(),
            });
        }
    }

    /// Flush remaining output and summarise the attempt.
    pub fn finish(mut self, stop_reason: StopReason) -> StreamSummary {
        self.flush();
        StreamSummary {
            elapsed: self.started.elapsed(),
            tokens: self.tokens,
            text: std::mem::take(&mut self.response),
            stop_reason,
        }
    }
}
