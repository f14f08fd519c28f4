//! Consecutive-token duplicate suppression.

use std::collections::VecDeque;

/// Number of recently emitted tokens retained for comparison.
const HISTORY_SLOTS: usize = 4;
/// A token is noise once its consecutive run counter exceeds this value.
const MAX_CONSECUTIVE_RUN: u32 = 3;

/// Flags a token as noise when it repeats too many consecutive times.
///
/// The detector keeps the last four emitted tokens. A token equal to the
/// immediately preceding one increments the run counter; once the counter
/// exceeds 3 the token is reported as a duplicate and is neither recorded
/// nor emitted. Any different token resets the counter.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    history: VecDeque<String>,
    run: u32,
    max_run: u32,
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_SLOTS),
            run: 0,
            max_run: MAX_CONSECUTIVE_RUN,
        }
    }

    /// Returns `true` if `token` should be dropped as noise.
    pub fn is_duplicate(&mut self, token: &str) -> bool {
        let repeats_last = self.history.back().is_some_and(|last| last == token);

        if repeats_last {
            self.run += 1;
            if self.run > self.max_run {
                return true;
            }
        } else {
            self.run = 0;
        }

        if self.history.len() == HISTORY_SLOTS {
            self.history.pop_front();
        }
        self.history.push_back(token.to_string());
        false
    }

    /// Current consecutive-repeat counter.
    pub fn run_length(&self) -> u32 {
        self.run
    }

    /// Recently emitted tokens, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.run = 0;
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifth_identical_token_is_flagged() {
        let mut detector = DuplicateDetector::new();
        let verdicts: Vec<bool> = (0..5).map(|_| detector.is_duplicate("the")).collect();
        // first emission + three tolerated repeats, the fourth repeat is noise
        assert_eq!(verdicts, vec![false, false, false, false, true]);
        assert_eq!(detector.run_length(), 4);
    }

    #[test]
    fn different_token_resets_run() {
        let mut detector = DuplicateDetector::new();
        for _ in 0..4 {
            detector.is_duplicate("x");
        }
        assert_eq!(detector.run_length(), 3);

        assert!(!detector.is_duplicate("y"));
        assert_eq!(detector.run_length(), 0);
        assert!(!detector.is_duplicate("x"));
    }

    #[test]
    fn history_keeps_four_slots() {
        let mut detector = DuplicateDetector::new();
        for token in ["a", "b", "c", "d", "e"] {
            detector.is_duplicate(token);
        }
        let recent: Vec<&str> = detector.recent().collect();
        assert_eq!(recent, vec!["b", "c", "d", "e"]);
    }

    #[test]
    fn duplicates_are_not_recorded() {
        let mut detector = DuplicateDetector::new();
        for _ in 0..8 {
            detector.is_duplicate("z");
        }
        assert_eq!(detector.recent().count(), 4);
        assert!(detector.is_duplicate("z"));
    }

    #[test]
    fn reset_clears_state() {
        let mut detector = DuplicateDetector::new();
        for _ in 0..6 {
            detector.is_duplicate("q");
        }
        detector.reset();
        assert_eq!(detector.run_length(), 0);
        assert!(!detector.is_duplicate("q"));
    }
}
