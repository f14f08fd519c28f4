//! Phrase-level repetition detection over a whole response.

use std::collections::HashMap;

const MIN_PHRASE_WORDS: usize = 5;
const MAX_PHRASE_WORDS: usize = 12;
const REPEAT_THRESHOLD: usize = 3;
/// Responses at or below this many characters are never flagged.
const MIN_RESPONSE_CHARS: usize = 100;

/// Flags a response as degenerate when a word phrase keeps recurring.
///
/// For every phrase length in `5..=12` words the detector slides a window
/// over the whitespace-tokenized response and counts exact phrase
/// occurrences. The response is repeating as soon as any phrase reaches
/// three occurrences.
#[derive(Debug, Clone)]
pub struct RepetitionDetector {
    min_words: usize,
    max_words: usize,
    threshold: usize,
    min_chars: usize,
}

impl RepetitionDetector {
    pub fn new() -> Self {
        Self {
            min_words: MIN_PHRASE_WORDS,
            max_words: MAX_PHRASE_WORDS,
            threshold: REPEAT_THRESHOLD,
            min_chars: MIN_RESPONSE_CHARS,
        }
    }

    /// Override the minimum response length before detection applies.
    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }

    /// Whether `response` is long enough to be checked at all.
    pub fn applies_to(&self, response: &str) -> bool {
        response.chars().count() > self.min_chars
    }

    /// Length-gated check used by the token loop.
    pub fn check(&self, response: &str) -> bool {
        self.applies_to(response) && self.is_repeating(response)
    }

    /// Ungated scan: `true` if any phrase of 5–12 words occurs 3+ times.
    pub fn is_repeating(&self, response: &str) -> bool {
        let words: Vec<&str> = response.split_whitespace().collect();

        for len in self.min_words..=self.max_words {
            if words.len() < len {
                break;
            }

            let mut counts: HashMap<&[&str], usize> = HashMap::new();
            for window in words.windows(len) {
                let count = counts.entry(window).or_insert(0);
                *count += 1;
                if *count >= self.threshold {
                    return true;
                }
            }
        }

        false
    }
}

impl Default for RepetitionDetector {
    fn default() -> Self {
        Self::new()
    }
}
