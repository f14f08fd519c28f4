//! Per-iteration statistics for the refinement loop.

use serde::{Deserialize, Serialize};

/// Where an iteration of the convergence loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    /// Build failed; affected files were regenerated.
    BuildFailed,
    /// Build passed but tests failed; affected files were regenerated.
    TestsFailed,
    /// Build and tests passed, completeness below threshold; files improved/added.
    Incomplete,
    /// Completeness reached the threshold.
    Converged,
    /// A collaborator call errored; the loop stopped with the prior state.
    Aborted,
}

/// Statistics for one loop iteration. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationMetrics {
    pub iteration: u32,
    pub build_success: bool,
    pub build_error_count: usize,
    pub tests_run: usize,
    pub tests_passed: usize,
    /// Analysis score; `None` when the iteration stopped before analysis.
    pub completeness_score: Option<f64>,
    pub missing_file_count: usize,
    /// Files rewritten or added during this iteration.
    pub files_touched: usize,
    pub duration_ms: u64,
    pub outcome: IterationOutcome,
}

impl IterationMetrics {
    pub fn new(iteration: u32, outcome: IterationOutcome) -> Self {
        Self {
            iteration,
            build_success: false,
            build_error_count: 0,
            tests_run: 0,
            tests_passed: 0,
            completeness_score: None,
            missing_file_count: 0,
            files_touched: 0,
            duration_ms: 0,
            outcome,
        }
    }
}

/// Append-only log of iteration metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsLog {
    entries: Vec<IterationMetrics>,
}

impl MetricsLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metrics: IterationMetrics) {
        self.entries.push(metrics);
    }

    pub fn entries(&self) -> &[IterationMetrics] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&IterationMetrics> {
        self.entries.last()
    }

    /// Highest completeness score seen in any analysed iteration.
    pub fn best_score(&self) -> Option<f64> {
        self.entries
            .iter()
            .filter_map(|m| m.completeness_score)
            .fold(None, |best, s| Some(best.map_or(s, |b: f64| b.max(s))))
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.entries.iter().map(|m| m.duration_ms).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_score_ignores_unanalysed_iterations() {
        let mut log = MetricsLog::new();
        log.push(IterationMetrics::new(1, IterationOutcome::BuildFailed));
        let mut second = IterationMetrics::new(2, IterationOutcome::Incomplete);
        second.completeness_score = Some(0.7);
        log.push(second);
        let mut third = IterationMetrics::new(3, IterationOutcome::Incomplete);
        third.completeness_score = Some(0.6);
        log.push(third);

        assert_eq!(log.best_score(), Some(0.7));
        assert_eq!(log.last().map(|m| m.iteration), Some(3));
    }

    #[test]
    fn serializes_as_plain_array() {
        let mut log = MetricsLog::new();
        log.push(IterationMetrics::new(1, IterationOutcome::Converged));
        let json = serde_json::to_value(&log).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["outcome"], "converged");
    }
}
