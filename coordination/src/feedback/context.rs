//! Context selection for fix prompts.

use std::collections::BTreeSet;

use strsim::normalized_levenshtein;

use super::association::normalized_subject;
use super::routing::resolve_path;
use crate::project::{GeneratedFile, ProjectImplementation};
use crate::verdict::{is_system_attributed, TestFailure};

const SAME_DIRECTORY_BONUS: f64 = 0.5;
const MIN_RELATED_SCORE: f64 = 0.3;

/// Up to `limit` files whose path/name resemble `path`, most similar first.
///
/// Placeholders carry no useful content and are never returned.
pub fn related_files<'a>(
    implementation: &'a ProjectImplementation,
    path: &str,
    limit: usize,
) -> Vec<&'a GeneratedFile> {
    let Some(target) = implementation.get(path) else {
        return Vec::new();
    };
    let target_stem = normalized_subject(target.stem());

    let mut scored: Vec<(f64, &GeneratedFile)> = implementation
        .files()
        .filter(|f| f.path != target.path && !f.is_placeholder())
        .map(|f| {
            let mut score = normalized_levenshtein(&target_stem, &normalized_subject(f.stem()));
            if f.directory() == target.directory() {
                score += SAME_DIRECTORY_BONUS;
            }
            (score, f)
        })
        .filter(|(score, _)| *score >= MIN_RELATED_SCORE)
        .collect();

    scored.sort_by(|(sa, fa), (sb, fb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| fa.path.cmp(&fb.path))
    });
    scored.into_iter().take(limit).map(|(_, f)| f).collect()
}

/// Test source files named by `failures` that exist in the implementation.
pub fn failing_test_sources<'a>(
    implementation: &'a ProjectImplementation,
    failures: &[TestFailure],
) -> Vec<&'a GeneratedFile> {
    let paths: BTreeSet<String> = failures
        .iter()
        .filter_map(|f| f.file_path.as_deref())
        .filter(|p| !is_system_attributed(Some(p)))
        .filter_map(|p| resolve_path(implementation, p))
        .collect();
    paths
        .iter()
        .filter_map(|p| implementation.get(p))
        .collect()
}
