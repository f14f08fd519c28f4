//! Verdicts returned by the external build, test, and analysis services.
//!
//! These are consumed read-only by the refinement loop. Any diagnostic whose
//! file path is missing or names the system rather than a project file is
//! "system-attributed": it is logged and never triggers a file-level fix.

use serde::{Deserialize, Serialize};

/// Paths that mean "not a specific file".
const SYSTEM_PATHS: &[&str] = &["system", "<system>", "project", "<unknown>", "unknown"];

/// Whether `path` names no specific project file.
pub fn is_system_attributed(path: Option<&str>) -> bool {
    match path.map(str::trim) {
        None | Some("") => true,
        Some(p) => SYSTEM_PATHS.iter().any(|s| p.eq_ignore_ascii_case(s)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildError {
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl BuildError {
    pub fn new(file_path: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            file_path: Some(file_path.into()),
            line: Some(line),
            message: message.into(),
            code: None,
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self {
            file_path: None,
            line: None,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_system(&self) -> bool {
        is_system_attributed(self.file_path.as_deref())
    }

    /// One-line rendering used in fix prompts.
    pub fn describe(&self) -> String {
        let location = match (&self.file_path, self.line) {
            (Some(path), Some(line)) => format!("{path}:{line}"),
            (Some(path), None) => path.clone(),
            _ => "system".to_string(),
        };
        match &self.code {
            Some(code) => format!("{location}: {code}: {}", self.message),
            None => format!("{location}: {}", self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<BuildError>,
}

impl BuildResult {
    pub fn passed() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<BuildError>) -> Self {
        Self {
            success: false,
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub test_name: String,
    /// Test source file that contains the failing test.
    #[serde(default)]
    pub file_path: Option<String>,
    pub error_message: String,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub actual: Option<String>,
}

impl TestFailure {
    pub fn new(test_name: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            file_path: None,
            error_message: error_message.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn in_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_values(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }

    pub fn describe(&self) -> String {
        let mut out = format!("{}: {}", self.test_name, self.error_message);
        if let (Some(expected), Some(actual)) = (&self.expected, &self.actual) {
            out.push_str(&format!(" (expected: {expected}, actual: {actual})"));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub all_passing: bool,
    pub tests_run: usize,
    pub tests_passed: usize,
    #[serde(default)]
    pub failures: Vec<TestFailure>,
}

impl TestResult {
    pub fn passing(tests_run: usize) -> Self {
        Self {
            all_passing: true,
            tests_run,
            tests_passed: tests_run,
            failures: Vec::new(),
        }
    }

    pub fn failing(tests_run: usize, failures: Vec<TestFailure>) -> Self {
        Self {
            all_passing: false,
            tests_run,
            tests_passed: tests_run.saturating_sub(failures.len()),
            failures,
        }
    }
}

/// A file the analysis expects but the implementation lacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingFile {
    pub path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub purpose: String,
}

/// Per-file completeness assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub file_path: String,
    pub completion_score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub missing_features: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeAnalysisResult {
    pub completeness_score: f64,
    #[serde(default)]
    pub missing_files: Vec<MissingFile>,
    #[serde(default)]
    pub per_file: Vec<FileAnalysis>,
}

impl CodeAnalysisResult {
    pub fn complete() -> Self {
        Self {
            completeness_score: 1.0,
            ..Self::default()
        }
    }

    /// Files scoring below `threshold`, worst first. System entries are skipped.
    pub fn files_below(&self, threshold: f64) -> Vec<&FileAnalysis> {
        let mut below: Vec<&FileAnalysis> = self
            .per_file
            .iter()
            .filter(|f| !is_system_attributed(Some(&f.file_path)))
            .filter(|f| f.completion_score < threshold)
            .collect();
        below.sort_by(|a, b| {
            a.completion_score
                .partial_cmp(&b.completion_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file_path.cmp(&b.file_path))
        });
        below
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_attribution() {
        assert!(is_system_attributed(None));
        assert!(is_system_attributed(Some("  ")));
        assert!(is_system_attributed(Some("System")));
        assert!(!is_system_attributed(Some("src/lib.rs")));
        assert!(BuildError::system("linker failed").is_system());
    }

    #[test]
    fn describe_build_error() {
        let err = BuildError::new("src/a.rs", 12, "mismatched types").with_code("E0308");
        assert_eq!(err.describe(), "src/a.rs:12: E0308: mismatched types");
    }

    #[test]
    fn files_below_sorts_worst_first() {
        let analysis = CodeAnalysisResult {
            completeness_score: 0.5,
            missing_files: vec![],
            per_file: vec![
                FileAnalysis {
                    file_path: "b.rs".into(),
                    completion_score: 0.8,
                    issues: vec![],
                    missing_features: vec![],
                },
                FileAnalysis {
                    file_path: "a.rs".into(),
                    completion_score: 0.2,
                    issues: vec![],
                    missing_features: vec![],
                },
                FileAnalysis {
                    file_path: "c.rs".into(),
                    completion_score: 0.99,
                    issues: vec![],
                    missing_features: vec![],
                },
            ],
        };
        let below: Vec<&str> = analysis
            .files_below(0.95)
            .iter()
            .map(|f| f.file_path.as_str())
            .collect();
        assert_eq!(below, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn test_result_counts() {
        let result = TestResult::failing(5, vec![TestFailure::new("t1", "boom")]);
        assert_eq!(result.tests_passed, 4);
        assert!(!result.all_passing);
    }
}
