//! Executor status: explicit states and legal transition guards.
//!
//! ```text
//! Ready ──request──▶ Processing ──success──▶ Ready
//!                        │
//!                        └──failure──▶ Error ──reinit ok──▶ Processing
//!                                        ▲         │
//!                                        └─────────┘ reinit failed
//! ```
//!
//! Every transition is logged at `debug` and recorded in a bounded log.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Transitions retained for diagnostics.
const TRANSITION_LOG_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStatus {
    /// Session loaded, no request in flight.
    Ready,
    /// A request owns the session.
    Processing,
    /// The last request failed; the session must be reinitialized.
    Error,
}

impl fmt::Display for ExecutorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Processing => write!(f, "Processing"),
            Self::Error => write!(f, "Error"),
        }
    }
}

fn is_legal_transition(from: ExecutorStatus, to: ExecutorStatus) -> bool {
    use ExecutorStatus::*;

    matches!(
        (from, to),
        (Ready, Processing)
            | (Processing, Ready)
            | (Processing, Error)
            // Recovery: reinit succeeded, re-enter processing directly
            | (Error, Processing)
            // Explicit reinit outside a request
            | (Error, Ready)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: ExecutorStatus,
    pub to: ExecutorStatus,
    /// Milliseconds since the engine was opened.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: ExecutorStatus,
    pub to: ExecutorStatus,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal status transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

#[derive(Debug)]
pub struct StatusMachine {
    current: ExecutorStatus,
    created_at: Instant,
    transitions: VecDeque<TransitionRecord>,
}

impl StatusMachine {
    pub fn new() -> Self {
        Self {
            current: ExecutorStatus::Ready,
            created_at: Instant::now(),
            transitions: VecDeque::new(),
        }
    }

    pub fn current(&self) -> ExecutorStatus {
        self.current
    }

    pub fn advance(
        &mut self,
        to: ExecutorStatus,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, reason, "Executor status transition");

        if self.transitions.len() == TRANSITION_LOG_CAPACITY {
            self.transitions.pop_front();
        }
        self.transitions.push_back(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn transitions(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.transitions.iter()
    }
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}
