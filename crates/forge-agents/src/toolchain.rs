//! Command-line toolchain collaborators.
//!
//! The implementation is written into a workspace directory and the
//! configured build/test commands are run there under a timeout. Output is
//! parsed into verdicts with a handful of diagnostic formats:
//!
//! | Format   | Example                                              |
//! |----------|------------------------------------------------------|
//! | rustc    | `error[E0412]: ...` followed by `--> src/a.rs:3:5`    |
//! | msbuild  | `src/A.cs(3,5): error CS0246: ...`                    |
//! | generic  | `src/a.c:3:5: error: ...`, `./main.go:3:5: ...`       |
//!
//! `cargo build --message-format=short` output falls under the generic form.

use std::path::{Component, Path, PathBuf};
use std::process::Output;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use forge_coordination::analysis;
use forge_coordination::project::{ProjectFile, ProjectImplementation};
use forge_coordination::verdict::{
    BuildError, BuildResult, CodeAnalysisResult, TestFailure, TestResult,
};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collaborators::{BuildService, CodeAnalyzer, TestRunner};
use crate::config::ToolchainConfig;
use crate::errors::{ForgeError, ForgeResult};

/// Characters of raw output kept when no diagnostic could be parsed.
const MAX_EXCERPT_CHARS: usize = 2_000;

static RUSTC_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^error(?:\[(E\d+)\])?: (.+)\r?\n\s*--> ([^\s:]+):(\d+)")
        .expect("RUSTC_ERROR regex should compile")
});

static MSBUILD_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*([^\s(:][^(\r\n]*)\((\d+),\d+\): error ([A-Z]+\d+): (.+?)(?: \[[^\]]*\])?\r?$")
        .expect("MSBUILD_ERROR regex should compile")
});

static GENERIC_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([^\s:()]+\.[A-Za-z0-9]+):(\d+)(?::\d+)?: (?:(?:fatal )?error(?:\[(\w+)\])?: )?(.+?)\r?$")
        .expect("GENERIC_ERROR regex should compile")
});

static CARGO_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed")
        .expect("CARGO_SUMMARY regex should compile")
});

static CARGO_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^test (\S+) \.\.\. FAILED").expect("CARGO_FAILED regex should compile")
});

static PYTEST_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^FAILED ([^\s:]+)::(\S+)(?: - (.+?))?\r?$")
        .expect("PYTEST_FAILED regex should compile")
});

static PYTEST_COUNTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^=+ .*?(\d+) (passed|failed)(?:, (\d+) (passed|failed))?")
        .expect("PYTEST_COUNTS regex should compile")
});

static DOTNET_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Failed:\s*(\d+),\s*Passed:\s*(\d+),\s*Skipped:\s*\d+,\s*Total:\s*(\d+)")
        .expect("DOTNET_SUMMARY regex should compile")
});

static DOTNET_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Failed (\S+) \[").expect("DOTNET_FAILED regex should compile")
});

static GO_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*--- FAIL: (\S+)").expect("GO_FAILED regex should compile")
});

static JEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests:\s+(?:(\d+) failed, )?(?:\d+ skipped, )?(?:(\d+) passed, )?(\d+) total")
        .expect("JEST_SUMMARY regex should compile")
});

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= MAX_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - MAX_EXCERPT_CHARS).collect()
}

/// Extract file-attributed build errors from compiler output.
pub fn parse_build_errors(output: &str) -> Vec<BuildError> {
    let mut errors: Vec<BuildError> = Vec::new();
    let mut push = |error: BuildError| {
        if !errors.contains(&error) {
            errors.push(error);
        }
    };

    for cap in RUSTC_ERROR.captures_iter(output) {
        let line = cap[4].parse().unwrap_or(0);
        let mut error = BuildError::new(&cap[3], line, &cap[2]);
        if let Some(code) = cap.get(1) {
            error = error.with_code(code.as_str());
        }
        push(error);
    }
    for cap in MSBUILD_ERROR.captures_iter(output) {
        let line = cap[2].parse().unwrap_or(0);
        push(BuildError::new(cap[1].trim(), line, &cap[4]).with_code(&cap[3]));
    }
    for cap in GENERIC_ERROR.captures_iter(output) {
        let message = cap[4].trim();
        if message.starts_with("warning") || message.starts_with("note") {
            continue;
        }
        let line = cap[2].parse().unwrap_or(0);
        let mut error = BuildError::new(&cap[1], line, message);
        if let Some(code) = cap.get(3) {
            error = error.with_code(code.as_str());
        }
        push(error);
    }
    errors
}

fn count(cap: Option<regex::Match<'_>>) -> usize {
    cap.and_then(|m| m.as_str().parse().ok()).unwrap_or(0)
}

/// Extract test counts and failures from runner output.
///
/// Returns `(tests_run, failures)`.
pub fn parse_test_output(output: &str) -> (usize, Vec<TestFailure>) {
    let mut run = 0;
    let mut failures = Vec::new();

    for cap in CARGO_SUMMARY.captures_iter(output) {
        run += count(cap.get(1)) + count(cap.get(2));
    }
    for cap in CARGO_FAILED.captures_iter(output) {
        failures.push(TestFailure::new(&cap[1], "test failed"));
    }

    for cap in PYTEST_FAILED.captures_iter(output) {
        let message = cap.get(3).map_or("test failed", |m| m.as_str());
        failures.push(TestFailure::new(&cap[2], message).in_file(&cap[1]));
    }
    if let Some(cap) = PYTEST_COUNTS.captures(output) {
        run += count(cap.get(1)) + count(cap.get(3));
    }

    if let Some(cap) = DOTNET_SUMMARY.captures(output) {
        run += count(cap.get(3));
    }
    for cap in DOTNET_FAILED.captures_iter(output) {
        failures.push(TestFailure::new(&cap[1], "test failed"));
    }

    for cap in GO_FAILED.captures_iter(output) {
        failures.push(TestFailure::new(&cap[1], "test failed"));
    }

    if let Some(cap) = JEST_SUMMARY.captures(output) {
        run += count(cap.get(3));
    }

    (run.max(failures.len()), failures)
}

/// Resolve a project-relative path inside `root`, rejecting escapes.
fn workspace_path(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    safe.then(|| root.join(relative))
}

/// Write every file of `implementation` under `root`. Returns the count.
pub async fn materialize(root: &Path, implementation: &ProjectImplementation) -> ForgeResult<usize> {
    let io_err = |e: std::io::Error| ForgeError::collaborator("workspace", e);
    tokio::fs::create_dir_all(root).await.map_err(io_err)?;

    let mut written = 0;
    for file in implementation.files() {
        let Some(target) = workspace_path(root, &file.path) else {
            warn!(path = %file.path, "Refusing to write outside the workspace");
            continue;
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&target, &file.content).await.map_err(io_err)?;
        written += 1;
    }
    debug!(root = %root.display(), written, "Materialized implementation");
    Ok(written)
}

/// Outcome of running one toolchain command.
enum CommandOutcome {
    Finished(Output),
    TimedOut,
}

async fn run_with_timeout(
    service: &str,
    argv: &[String],
    dir: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ForgeResult<CommandOutcome> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ForgeError::collaborator(service, "empty command"))?;

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args).current_dir(dir).kill_on_drop(true);

    // Own process group so kill_on_drop also takes down spawned children.
    #[cfg(unix)]
    cmd.process_group(0);

    debug!(service, command = %argv.join(" "), "Running toolchain command");
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ForgeError::Cancelled),
        result = tokio::time::timeout(timeout, cmd.output()) => match result {
            Ok(Ok(output)) => Ok(CommandOutcome::Finished(output)),
            Ok(Err(e)) => Err(ForgeError::collaborator(service, format!("failed to execute {program}: {e}"))),
            Err(_) => Ok(CommandOutcome::TimedOut),
        },
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push('\n');
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

/// Runs the configured build command.
#[derive(Debug, Clone)]
pub struct CommandBuildService {
    toolchain: ToolchainConfig,
    workspace: PathBuf,
}

impl CommandBuildService {
    pub fn new(toolchain: ToolchainConfig, workspace: impl Into<PathBuf>) -> Self {
        Self {
            toolchain,
            workspace: workspace.into(),
        }
    }
}

#[async_trait]
impl BuildService for CommandBuildService {
    async fn build(
        &self,
        implementation: &ProjectImplementation,
        cancel: &CancellationToken,
    ) -> ForgeResult<BuildResult> {
        let argv = self
            .toolchain
            .build_argv()
            .map_err(|e| ForgeError::collaborator("build", e))?;
        materialize(&self.workspace, implementation).await?;

        let outcome = run_with_timeout(
            "build",
            &argv,
            &self.workspace,
            self.toolchain.timeout(),
            cancel,
        )
        .await?;

        let output = match outcome {
            CommandOutcome::TimedOut => {
                warn!(timeout_secs = self.toolchain.timeout_secs, "Build timed out");
                return Ok(BuildResult::failed(vec![BuildError::system(format!(
                    "build timed out after {}s",
                    self.toolchain.timeout_secs
                ))]));
            }
            CommandOutcome::Finished(output) => output,
        };

        if output.status.success() {
            info!("Build succeeded");
            return Ok(BuildResult::passed());
        }

        let text = combined_output(&output);
        let mut errors = parse_build_errors(&text);
        if errors.is_empty() {
            errors.push(BuildError::system(excerpt(&text)));
        }
        info!(errors = errors.len(), exit_code = ?output.status.code(), "Build failed");
        Ok(BuildResult::failed(errors))
    }
}

/// Runs the configured test command.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    toolchain: ToolchainConfig,
    workspace: PathBuf,
}

impl CommandTestRunner {
    pub fn new(toolchain: ToolchainConfig, workspace: impl Into<PathBuf>) -> Self {
        Self {
            toolchain,
            workspace: workspace.into(),
        }
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run_tests(
        &self,
        implementation: &ProjectImplementation,
        cancel: &CancellationToken,
    ) -> ForgeResult<TestResult> {
        let argv = self
            .toolchain
            .test_argv()
            .map_err(|e| ForgeError::collaborator("test", e))?;
        materialize(&self.workspace, implementation).await?;

        let outcome = run_with_timeout(
            "test",
            &argv,
            &self.workspace,
            self.toolchain.timeout(),
            cancel,
        )
        .await?;

        let output = match outcome {
            CommandOutcome::TimedOut => {
                warn!(timeout_secs = self.toolchain.timeout_secs, "Tests timed out");
                let failure = TestFailure::new(
                    "<unknown>",
                    format!("tests timed out after {}s", self.toolchain.timeout_secs),
                );
                return Ok(TestResult::failing(1, vec![failure]));
            }
            CommandOutcome::Finished(output) => output,
        };

        let text = combined_output(&output);
        let (run, mut failures) = parse_test_output(&text);

        if output.status.success() && failures.is_empty() {
            info!(tests_run = run, "Tests passed");
            return Ok(TestResult::passing(run));
        }
        if failures.is_empty() {
            failures.push(TestFailure::new("<unknown>", excerpt(&text)));
        }
        info!(tests_run = run, failed = failures.len(), "Tests failed");
        Ok(TestResult::failing(run.max(failures.len()), failures))
    }
}

/// Scores completeness from the implementation itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralAnalyzer;

#[async_trait]
impl CodeAnalyzer for StructuralAnalyzer {
    async fn analyze(
        &self,
        implementation: &ProjectImplementation,
        planned: &[ProjectFile],
        cancel: &CancellationToken,
    ) -> ForgeResult<CodeAnalysisResult> {
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }
        Ok(analysis::assess(implementation, planned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rustc_errors() {
        let output = "\
error[E0412]: cannot find type `Order` in this scope
  --> src/services/order_service.rs:12:18
   |
error: expected `;`, found `}`
 --> src/main.rs:4:2
";
        let errors = parse_build_errors(output);
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors[0].file_path.as_deref(),
            Some("src/services/order_service.rs")
        );
        assert_eq!(errors[0].line, Some(12));
        assert_eq!(errors[0].code.as_deref(), Some("E0412"));
        assert_eq!(errors[1].file_path.as_deref(), Some("src/main.rs"));
    }

    #[test]
    fn parses_msbuild_errors() {
        let output = "Services/UserService.cs(14,9): error CS0246: The type 'User' could not be found [/w/App.csproj]";
        let errors = parse_build_errors(output);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].file_path.as_deref(), Some("Services/UserService.cs"));
        assert_eq!(errors[0].code.as_deref(), Some("CS0246"));
        assert_eq!(errors[0].message, "The type 'User' could not be found");
    }

    #[test]
    fn parses_short_cargo_format() {
        let errors = parse_build_errors("src/lib.rs:7:9: error[E0425]: cannot find value `x`\n");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code.as_deref(), Some("E0425"));
        assert_eq!(errors[0].message, "cannot find value `x`");
    }

    #[test]
    fn generic_format_skips_warnings() {
        let output = "src/a.c:3:5: warning: unused variable\nsrc/a.c:9:1: error: expected ';'\n";
        let errors = parse_build_errors(output);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, Some(9));
        assert_eq!(errors[0].message, "expected ';'");
    }

    #[test]
    fn parses_cargo_test_output() {
        let output = "\
test tests::adds ... ok
test tests::subtracts ... FAILED

test result: FAILED. 1 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out
";
        let (run, failures) = parse_test_output(output);
        assert_eq!(run, 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].test_name, "tests::subtracts");
    }

    #[test]
    fn parses_pytest_failures_with_file() {
        let output = "\
FAILED tests/test_user.py::test_create - AssertionError: 1 != 2
========== 1 failed, 3 passed in 0.12s ==========
";
        let (run, failures) = parse_test_output(output);
        assert_eq!(run, 4);
        assert_eq!(failures[0].file_path.as_deref(), Some("tests/test_user.py"));
        assert_eq!(failures[0].error_message, "AssertionError: 1 != 2");
    }

    #[test]
    fn workspace_rejects_escaping_paths() {
        let root = Path::new("/tmp/ws");
        assert!(workspace_path(root, "../etc/passwd").is_none());
        assert!(workspace_path(root, "/etc/passwd").is_none());
        assert_eq!(
            workspace_path(root, "src/a.rs"),
            Some(PathBuf::from("/tmp/ws/src/a.rs"))
        );
    }
}
