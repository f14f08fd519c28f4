//! Bounded conversation history and prompt rendering.
//!
//! `ConversationContext` keeps the user/assistant turns that are replayed to
//! the model on every request, plus a separate capped debug trail that
//! survives eviction for export and inspection.
//!
//! ```text
//! <|system|>
//! {system instruction}<|end|>
//! <|user|>
//! {turn}<|end|>
//! <|assistant|>
//! {turn}<|end|>
//! ...
//! <|assistant|>          ← continuation cue when the last turn is not the assistant's
//! ```

mod markers;

pub use markers::RoleMarkers;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of entries retained in the debug trail.
pub const DEBUG_TRAIL_CAPACITY: usize = 100;

/// Default instruction rendered ahead of every prompt.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a senior software engineer. \
    Produce complete, working source files. Respond only with what was asked.";

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// A single immutable turn in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    role: Role,
    text: String,
    created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Ordered, bounded history of user/assistant turns.
///
/// Invariant: after any mutation the history holds at most
/// `2 × context_limit` entries. Eviction removes the oldest complete
/// user→assistant pair, or the single oldest entry if no such pair exists.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    system_instruction: String,
    context_limit: usize,
    markers: RoleMarkers,
    history: VecDeque<ConversationTurn>,
    debug_trail: VecDeque<ConversationTurn>,
}

impl ConversationContext {
    /// Create a context retaining at most `context_limit` user/assistant pairs.
    pub fn new(context_limit: usize) -> Self {
        Self {
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            context_limit: context_limit.max(1),
            markers: RoleMarkers::default(),
            history: VecDeque::new(),
            debug_trail: VecDeque::new(),
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn with_markers(mut self, markers: RoleMarkers) -> Self {
        self.markers = markers;
        self
    }

    pub fn markers(&self) -> &RoleMarkers {
        &self.markers
    }

    pub fn context_limit(&self) -> usize {
        self.context_limit
    }

    pub fn add_user_turn(&mut self, text: impl Into<String>) {
        self.push(ConversationTurn::new(Role::User, text));
    }

    pub fn add_assistant_turn(&mut self, text: impl Into<String>) {
        self.push(ConversationTurn::new(Role::Assistant, text));
    }

    /// Remove the most recent turn if it is an unanswered user turn.
    ///
    /// Used when a request fails so the dangling prompt is not replayed.
    /// The debug trail keeps the turn.
    pub fn discard_pending_user_turn(&mut self) -> Option<ConversationTurn> {
        match self.history.back() {
            Some(turn) if turn.role == Role::User => self.history.pop_back(),
            _ => None,
        }
    }

    /// Render the full prompt for the model.
    pub fn build_prompt(&self) -> String {
        let m = &self.markers;
        let mut prompt = String::new();

        prompt.push_str(&m.system);
        prompt.push('\n');
        prompt.push_str(&self.system_instruction);
        prompt.push_str(&m.end);
        prompt.push('\n');

        for turn in &self.history {
            prompt.push_str(m.for_role(turn.role));
            prompt.push('\n');
            prompt.push_str(&turn.text);
            prompt.push_str(&m.end);
            prompt.push('\n');
        }

        let last_is_assistant = self
            .history
            .back()
            .is_some_and(|turn| turn.role == Role::Assistant);
        if !last_is_assistant {
            prompt.push_str(&m.assistant);
            prompt.push('\n');
        }

        prompt
    }

    /// Retained turns, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Every turn ever added (capped at 100), oldest first.
    pub fn debug_trail(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.debug_trail.iter()
    }

    /// Export the debug trail as pretty-printed JSON.
    pub fn export_debug_trail(&self) -> serde_json::Result<String> {
        let turns: Vec<&ConversationTurn> = self.debug_trail.iter().collect();
        serde_json::to_string_pretty(&turns)
    }

    /// Clear retained history. The debug trail is kept.
    pub fn clear(&mut self) {
        self.history.clear();
    }

    fn push(&mut self, turn: ConversationTurn) {
        if self.debug_trail.len() == DEBUG_TRAIL_CAPACITY {
            self.debug_trail.pop_front();
        }
        self.debug_trail.push_back(turn.clone());

        self.history.push_back(turn);
        while self.history.len() > self.context_limit * 2 {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        let pair_start = (0..self.history.len().saturating_sub(1)).find(|&i| {
            self.history[i].role == Role::User && self.history[i + 1].role == Role::Assistant
        });

        match pair_start {
            Some(i) => {
                self.history.remove(i + 1);
                self.history.remove(i);
            }
            None => {
                self.history.pop_front();
            }
        }
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(10)
    }
}
