//! Fuzzy association of failing tests with the files they exercise.
//!
//! A failure is matched against implementation file stems, normalised by
//! lowercasing, stripping test affixes, and dropping separators. Ranking:
//!
//! 1. name containment (either direction) beats plain edit distance;
//! 2. lower Levenshtein distance wins;
//! 3. among equals, files sharing the test's directory win;
//! 4. anything still tied gets the failure attributed to every candidate.
//!
//! Candidates farther than the distance bound are never chosen; a failure
//! with no candidate is treated as system-attributed.

use strsim::levenshtein;

use super::routing::resolve_path;
use crate::project::{GeneratedFile, GroupKind, ProjectImplementation};
use crate::verdict::{is_system_attributed, TestFailure};

const MIN_CONTAINMENT_LEN: usize = 4;
const TEST_PREFIXES: &[&str] = &["test_", "tests_", "test-"];
const TEST_SUFFIXES: &[&str] = &["_tests", "_test", "-test", "tests", "test", "spec"];
const TEST_DIRS: &[&str] = &["tests", "test", "__tests__", "spec"];

/// Files a failing test is attributed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Association {
    pub targets: Vec<String>,
    /// More than one candidate remained after every tie-break.
    pub ambiguous: bool,
}

impl Association {
    fn single(path: String) -> Self {
        Self {
            targets: vec![path],
            ambiguous: false,
        }
    }
}

/// Normalise a file stem or test-name segment for comparison.
pub fn normalized_subject(name: &str) -> String {
    let stem = name.split('.').next().unwrap_or(name);
    let mut s = stem.to_lowercase();
    for prefix in TEST_PREFIXES {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.to_string();
            break;
        }
    }
    for suffix in TEST_SUFFIXES {
        if s.len() > suffix.len() {
            if let Some(rest) = s.strip_suffix(suffix) {
                s = rest.to_string();
                break;
            }
        }
    }
    s.chars().filter(|c| c.is_alphanumeric()).collect()
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn directory(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Directory with test-folder segments removed, for same-directory checks.
fn source_directory(dir: &str) -> String {
    dir.split('/')
        .filter(|seg| !seg.is_empty() && !TEST_DIRS.contains(&seg.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join("/")
}

fn subjects(failure: &TestFailure) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(path) = failure.file_path.as_deref() {
        if !is_system_attributed(Some(path)) {
            out.push(normalized_subject(file_name(&path.replace('\\', "/"))));
        }
    }
    if out.is_empty() {
        out.extend(
            failure
                .test_name
                .split(|c: char| c == ':' || c == '.' || c == '/')
                .map(normalized_subject),
        );
    }
    out.retain(|s| s.len() >= 3 && !TEST_DIRS.contains(&s.as_str()));
    out.dedup();
    out
}

fn distance_bound(subject: &str) -> usize {
    (subject.chars().count() / 3).max(2)
}

/// Rank key: `(not_contained, distance)`; lower is better.
fn rank(subjects: &[String], candidate: &str) -> Option<(bool, usize)> {
    subjects
        .iter()
        .filter_map(|subject| {
            let contained = candidate.len() >= MIN_CONTAINMENT_LEN
                && subject.len() >= MIN_CONTAINMENT_LEN
                && (subject.contains(candidate) || candidate.contains(subject.as_str()));
            let distance = levenshtein(subject, candidate);
            (contained || distance <= distance_bound(subject)).then_some((!contained, distance))
        })
        .min()
}

fn is_candidate(file: &GeneratedFile) -> bool {
    file.file_type.is_source() && GroupKind::classify_path(&file.path) != GroupKind::Tests
}

/// Choose the implementation file(s) a failing test most plausibly targets.
pub fn associate_failure(
    implementation: &ProjectImplementation,
    failure: &TestFailure,
) -> Association {
    // A failure reported inside an implementation file (e.g. inline unit
    // tests) targets that file directly.
    if let Some(raw) = failure.file_path.as_deref() {
        if !is_system_attributed(Some(raw)) {
            if let Some(path) = resolve_path(implementation, raw) {
                if GroupKind::classify_path(&path) != GroupKind::Tests {
                    return Association::single(path);
                }
            }
        }
    }

    let subjects = subjects(failure);
    if subjects.is_empty() {
        return Association::default();
    }

    let ranked: Vec<((bool, usize), &GeneratedFile)> = implementation
        .files()
        .filter(|f| is_candidate(f))
        .filter_map(|f| rank(&subjects, &normalized_subject(f.stem())).map(|key| (key, f)))
        .collect();

    let Some(best) = ranked.iter().map(|(key, _)| *key).min() else {
        return Association::default();
    };
    let mut tied: Vec<&GeneratedFile> = ranked
        .iter()
        .filter(|(key, _)| *key == best)
        .map(|(_, f)| *f)
        .collect();

    if tied.len() > 1 {
        let test_dir = failure
            .file_path
            .as_deref()
            .map(|p| source_directory(directory(&p.replace('\\', "/"))));
        if let Some(test_dir) = test_dir {
            let same_dir: Vec<&GeneratedFile> = tied
                .iter()
                .copied()
                .filter(|f| source_directory(f.directory()) == test_dir)
                .collect();
            if !same_dir.is_empty() {
                tied = same_dir;
            }
        }
    }

    Association {
        ambiguous: tied.len() > 1,
        targets: tied.into_iter().map(|f| f.path.clone()).collect(),
    }
}
