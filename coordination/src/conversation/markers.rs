//! Role markers shared by prompt rendering, stop detection, and cleanup.

use serde::{Deserialize, Serialize};

use super::Role;

/// Textual tags delimiting turns in the rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleMarkers {
    pub system: String,
    pub user: String,
    pub assistant: String,
    /// End-of-turn tag appended after every turn.
    pub end: String,
    /// Plain-text prefixes some models emit instead of tags (e.g. `"User:"`).
    pub user_aliases: Vec<String>,
    pub assistant_aliases: Vec<String>,
}

impl Default for RoleMarkers {
    fn default() -> Self {
        Self {
            system: "<|system|>".to_string(),
            user: "<|user|>".to_string(),
            assistant: "<|assistant|>".to_string(),
            end: "<|end|>".to_string(),
            user_aliases: vec!["User:".to_string(), "Human:".to_string()],
            assistant_aliases: vec!["Assistant:".to_string(), "AI:".to_string()],
        }
    }
}

impl RoleMarkers {
    pub fn for_role(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
            Role::System => &self.system,
        }
    }

    /// Markers whose appearance means the model finished its turn.
    pub fn completion_markers(&self) -> Vec<String> {
        vec![self.end.clone(), self.user.clone(), self.system.clone()]
    }

    /// Markers that open a new user turn (tag first, then aliases).
    pub fn user_turn_markers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.user.as_str()).chain(self.user_aliases.iter().map(String::as_str))
    }

    /// Markers that may prefix an assistant reply.
    pub fn assistant_prefixes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.assistant.as_str())
            .chain(self.assistant_aliases.iter().map(String::as_str))
    }

    /// Every tag that must never appear in cleaned output.
    pub fn all_tags(&self) -> [&str; 4] {
        [
            self.system.as_str(),
            self.user.as_str(),
            self.assistant.as_str(),
            self.end.as_str(),
        ]
    }
}
