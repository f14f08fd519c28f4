//! Structural completeness scoring.
//!
//! A deterministic stand-in for a semantic code reviewer: compares the
//! planned file set against what exists and penalises placeholders, empty
//! files, and stub markers left in source.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::project::{ProjectFile, ProjectImplementation};
use crate::verdict::{CodeAnalysisResult, FileAnalysis, MissingFile};

static STUB_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(\bTODO\b|\bFIXME\b|unimplemented!\(|todo!\(|NotImplementedException|raise NotImplementedError|throw new Error\(['\x22]not implemented)",
    )
    .expect("STUB_PATTERN regex should compile")
});

const STUB_PENALTY: f64 = 0.2;
const MIN_STUBBED_SCORE: f64 = 0.1;
const MIN_SOURCE_LINES: usize = 3;
const SHORT_SOURCE_CAP: f64 = 0.5;

/// Score one file's content in `[0, 1]`, with the issues found.
pub fn score_content(content: &str, is_source: bool) -> (f64, Vec<String>) {
    let mut issues = Vec::new();
    let lines = content.lines().filter(|l| !l.trim().is_empty()).count();
    if lines == 0 {
        issues.push("file is empty".to_string());
        return (0.0, issues);
    }

    let mut score: f64 = 1.0;
    let stubs: Vec<&str> = STUB_PATTERN
        .find_iter(content)
        .map(|m| m.as_str())
        .collect();
    if !stubs.is_empty() {
        issues.push(format!("{} stub marker(s): {}", stubs.len(), stubs.join(", ")));
        score = (score - STUB_PENALTY * stubs.len() as f64).max(MIN_STUBBED_SCORE);
    }
    if is_source && lines < MIN_SOURCE_LINES {
        issues.push(format!("only {lines} non-blank line(s)"));
        score = score.min(SHORT_SOURCE_CAP);
    }
    (score, issues)
}

/// Assess `implementation` against the `planned` file set.
///
/// The overall score averages per-file scores across the union of planned
/// and present files; a planned-but-absent file scores zero.
pub fn assess(implementation: &ProjectImplementation, planned: &[ProjectFile]) -> CodeAnalysisResult {
    let mut per_file = Vec::new();
    for file in implementation.files() {
        let (score, issues) = if file.is_placeholder() {
            (0.0, vec!["placeholder emitted after failed generation".to_string()])
        } else {
            score_content(&file.content, file.file_type.is_source())
        };
        per_file.push(FileAnalysis {
            file_path: file.path.clone(),
            completion_score: score,
            issues,
            missing_features: Vec::new(),
        });
    }

    let mut seen = BTreeSet::new();
    let missing_files: Vec<MissingFile> = planned
        .iter()
        .filter(|p| !implementation.contains(&p.path) && seen.insert(p.path.clone()))
        .map(|p| MissingFile {
            path: p.path.clone(),
            description: format!("planned file {} was not generated", p.name),
            purpose: p.purpose.clone(),
        })
        .collect();

    let denominator = per_file.len() + missing_files.len();
    let completeness_score = if denominator == 0 {
        0.0
    } else {
        per_file.iter().map(|f| f.completion_score).sum::<f64>() / denominator as f64
    };

    CodeAnalysisResult {
        completeness_score,
        missing_files,
        per_file,
    }
}
