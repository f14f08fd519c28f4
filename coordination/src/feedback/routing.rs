//! Diagnostic-to-file grouping.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::association::associate_failure;
use crate::project::{GroupKind, ProjectImplementation};
use crate::verdict::{BuildError, MissingFile, TestFailure};

fn normalize(raw: &str) -> String {
    let mut path = raw.trim().replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    path
}

/// Map a diagnostic path onto a file of the implementation.
///
/// Tools often report absolute or workspace-prefixed paths; those resolve to
/// the longest implementation path they end with.
pub fn resolve_path(implementation: &ProjectImplementation, raw: &str) -> Option<String> {
    let path = normalize(raw);
    if path.is_empty() {
        return None;
    }
    if implementation.contains(&path) {
        return Some(path);
    }
    implementation
        .paths()
        .filter(|p| path.ends_with(&format!("/{p}")) || p.ends_with(&format!("/{path}")))
        .max_by_key(|p| p.len())
        .map(str::to_string)
}

/// Group build errors by the implementation file they belong to.
///
/// System-attributed errors and errors naming unknown files are logged and
/// skipped.
pub fn group_build_errors(
    implementation: &ProjectImplementation,
    errors: &[BuildError],
) -> BTreeMap<String, Vec<BuildError>> {
    let mut grouped: BTreeMap<String, Vec<BuildError>> = BTreeMap::new();
    for error in errors {
        if error.is_system() {
            warn!(message = %error.message, "Skipping system-attributed build error");
            continue;
        }
        let raw = error.file_path.as_deref().unwrap_or_default();
        match resolve_path(implementation, raw) {
            Some(path) => grouped.entry(path).or_default().push(error.clone()),
            None => warn!(path = raw, message = %error.message, "Build error names no known file"),
        }
    }
    grouped
}

/// Group test failures by the implementation file each most plausibly targets.
///
/// Failures associated with several equally likely files are attached to all
/// of them.
pub fn group_test_failures(
    implementation: &ProjectImplementation,
    failures: &[TestFailure],
) -> BTreeMap<String, Vec<TestFailure>> {
    let mut grouped: BTreeMap<String, Vec<TestFailure>> = BTreeMap::new();
    for failure in failures {
        let association = associate_failure(implementation, failure);
        if association.targets.is_empty() {
            warn!(test = %failure.test_name, "Skipping test failure with no target file");
            continue;
        }
        if association.ambiguous {
            debug!(
                test = %failure.test_name,
                targets = ?association.targets,
                "Ambiguous test association"
            );
        }
        for target in association.targets {
            grouped.entry(target).or_default().push(failure.clone());
        }
    }
    grouped
}

/// Order missing files so structural/domain paths are generated first.
///
/// Entries that are system-attributed or already present are dropped; the
/// rest are deduplicated by path.
pub fn prioritize_missing(
    implementation: &ProjectImplementation,
    missing: &[MissingFile],
) -> Vec<MissingFile> {
    let mut seen = std::collections::BTreeSet::new();
    let mut ordered: Vec<(GroupKind, MissingFile)> = missing
        .iter()
        .filter_map(|m| {
            let path = normalize(&m.path);
            if crate::verdict::is_system_attributed(Some(&path)) {
                warn!("Skipping system-attributed missing file entry");
                return None;
            }
            if implementation.contains(&path) || !seen.insert(path.clone()) {
                return None;
            }
            let mut entry = m.clone();
            entry.path = path;
            Some((GroupKind::classify_path(&entry.path), entry))
        })
        .collect();
    ordered.sort_by(|(ka, a), (kb, b)| ka.cmp(kb).then_with(|| a.path.cmp(&b.path)));
    ordered.into_iter().map(|(_, m)| m).collect()
}
