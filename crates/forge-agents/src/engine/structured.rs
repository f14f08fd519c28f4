//! Interpreting free-form model output as booleans or JSON values.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\n(.*?)```").expect("FENCED_JSON regex should compile")
});

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z']+").expect("WORD regex should compile"));

const AFFIRMATIVE: &[&str] = &[
    "yes", "true", "correct", "affirmative", "y", "agree", "confirmed", "right",
];
/// Any of these overrides an affirmative term ("yes, but not ...").
const NEGATION: &[&str] = &[
    "no", "not", "false", "incorrect", "never", "don't", "doesn't", "isn't", "cannot", "can't",
    "negative", "wrong",
];

/// Map a reply to a boolean: affirmative terms count only when no negation
/// appears anywhere in the reply.
pub fn interpret_boolean(reply: &str) -> bool {
    let words: Vec<String> = WORD
        .find_iter(reply)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if words.iter().any(|w| NEGATION.contains(&w.as_str())) {
        return false;
    }
    words.iter().any(|w| AFFIRMATIVE.contains(&w.as_str()))
}

/// Locate the JSON payload in a reply: a fenced block, else the outermost
/// object/array span.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(body) = FENCED_JSON.captures(text).and_then(|c| c.get(1)) {
        let body = body.as_str().trim();
        if !body.is_empty() {
            return Some(body);
        }
    }
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let payload = extract_json(text).ok_or_else(|| "no JSON object or array found".to_string())?;
    serde_json::from_str(payload).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn boolean_affirmative_and_negation() {
        assert!(interpret_boolean("Yes."));
        assert!(interpret_boolean("That is correct"));
        assert!(!interpret_boolean("Yes, but it is not complete"));
        assert!(!interpret_boolean("No"));
        assert!(!interpret_boolean("maybe"));
        assert!(!interpret_boolean("eyes open"));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        path: String,
    }

    #[test]
    fn extracts_fenced_json() {
        let text = "Here you go:\n```json\n[{\"path\": \"a.rs\"}]\n```\nDone.";
        let items: Vec<Item> = parse_json(text).unwrap();
        assert_eq!(items, vec![Item { path: "a.rs".into() }]);
    }

    #[test]
    fn extracts_bare_object() {
        let text = "Sure! {\"path\": \"b.rs\"} hope that helps";
        let item: Item = parse_json(text).unwrap();
        assert_eq!(item.path, "b.rs");
    }

    #[test]
    fn reports_missing_json() {
        assert!(parse_json::<Item>("no json here").is_err());
        assert!(parse_json::<Item>("{\"path\": 1}").is_err());
    }
}
