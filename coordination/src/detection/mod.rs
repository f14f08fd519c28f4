//! Degenerate-output detection for streamed model responses.
//!
//! Two detectors run inside the token loop:
//!
//! | Detector              | Granularity     | Flags                                        |
//! |-----------------------|-----------------|----------------------------------------------|
//! | `DuplicateDetector`   | single token    | a token repeated more than 3 times in a row  |
//! | `RepetitionDetector`  | whole response  | any 5–12 word phrase occurring 3+ times      |
//!
//! The duplicate detector is stateful and scoped to one generation attempt;
//! the repetition detector is stateless and re-scans the full response text
//! every time it is consulted.

pub mod duplicate;
pub mod repetition;

pub use duplicate::DuplicateDetector;
pub use repetition::RepetitionDetector;
