//! Post-processing of raw model output.

use forge_coordination::conversation::RoleMarkers;
use regex::Regex;

use crate::errors::{GenerationError, GenerationResult};

/// Strips role scaffolding the model echoes around its reply.
///
/// 1. Truncate at the first completion marker.
/// 2. Drop a leading assistant-role prefix.
/// 3. Cut any trailing fragment that opens a new user turn, including a
///    partially emitted tag at the very end.
/// 4. Remove any remaining role tags.
#[derive(Debug, Clone)]
pub struct ResponseCleaner {
    markers: RoleMarkers,
    completion_markers: Vec<String>,
    user_turn: Regex,
    assistant_prefix: Regex,
}

fn alternation<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items
        .filter(|s| !s.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|")
}

impl ResponseCleaner {
    pub fn new(markers: &RoleMarkers, completion_markers: &[String]) -> GenerationResult<Self> {
        let user = alternation(markers.user_turn_markers());
        let assistant = alternation(markers.assistant_prefixes());
        let user_turn = Regex::new(&format!(r"(?m)^[ \t]*(?:{user})"))
            .map_err(|e| GenerationError::Configuration(format!("user markers: {e}")))?;
        let assistant_prefix = Regex::new(&format!(r"^\s*(?:{assistant})[ \t]*\n?"))
            .map_err(|e| GenerationError::Configuration(format!("assistant markers: {e}")))?;
        Ok(Self {
            markers: markers.clone(),
            completion_markers: completion_markers
                .iter()
                .filter(|m| !m.is_empty())
                .cloned()
                .collect(),
            user_turn,
            assistant_prefix,
        })
    }

    pub fn clean(&self, raw: &str) -> String {
        let mut text = raw;

        if let Some(pos) = self
            .completion_markers
            .iter()
            .filter_map(|m| text.find(m.as_str()))
            .min()
        {
            text = &text[..pos];
        }

        if let Some(m) = self.assistant_prefix.find(text) {
            text = &text[m.end()..];
        }

        if let Some(m) = self.user_turn.find(text) {
            text = &text[..m.start()];
        }

        let mut text = strip_partial_tag(text, &self.markers.all_tags()).to_string();
        for tag in self.markers.all_tags() {
            if !tag.is_empty() {
                text = text.replace(tag, "");
            }
        }
        text.trim().to_string()
    }
}

/// Drop a trailing prefix of any tag, e.g. `"...<|us"`.
fn strip_partial_tag<'a>(text: &'a str, tags: &[&str]) -> &'a str {
    let longest = tags
        .iter()
        .filter_map(|tag| {
            (1..tag.len())
                .rev()
                .filter(|&n| tag.is_char_boundary(n))
                .find(|&n| text.ends_with(&tag[..n]))
        })
        .max();
    match longest {
        // Single characters like "<" are too common to strip blindly.
        Some(n) if n >= 2 => &text[..text.len() - n],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleaner() -> ResponseCleaner {
        let markers = RoleMarkers::default();
        ResponseCleaner::new(&markers, &markers.completion_markers()).unwrap()
    }

    #[test]
    fn strips_assistant_prefix() {
        assert_eq!(cleaner().clean("<|assistant|>\nHello there"), "Hello there");
        assert_eq!(cleaner().clean("Assistant: Hello"), "Hello");
    }

    #[test]
    fn truncates_at_completion_marker() {
        assert_eq!(
            cleaner().clean("fn main() {}<|end|>\n<|user|>\nmore"),
            "fn main() {}"
        );
    }

    #[test]
    fn cuts_hallucinated_user_turn() {
        assert_eq!(
            cleaner().clean("The answer is 4.\nUser: and 5+5?\nAssistant: 10"),
            "The answer is 4."
        );
    }

    #[test]
    fn strips_partial_trailing_tag() {
        assert_eq!(cleaner().clean("All done.\n<|us"), "All done.");
        assert_eq!(cleaner().clean("a < b"), "a < b");
    }

    #[test]
    fn removes_residual_tags() {
        assert_eq!(cleaner().clean("x <|assistant|> y"), "x  y");
    }
}
