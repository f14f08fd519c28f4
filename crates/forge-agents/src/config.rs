//! Runtime configuration for the engine, backend, orchestrator, and toolchains.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (`FORGE_BASE_URL`, `FORGE_MODEL`,
//!    `FORGE_API_KEY`, `FORGE_MAX_ITERATIONS`)
//! 2. Values from the TOML config file
//! 3. Built-in defaults
//!
//! ## Example
//!
//! ```toml
//! [engine]
//! max_tokens = 4096
//! context_limit = 10
//!
//! [engine.retry]
//! max_attempts = 3
//!
//! [backend]
//! kind = "openai_stream"
//! base_url = "http://localhost:8080/v1"
//! model = "qwen2.5-coder-32b"
//!
//! [orchestrator]
//! max_iterations = 5
//! convergence_threshold = 0.95
//!
//! [toolchains.rust]
//! build = "cargo build --message-format=short"
//! test = "cargo test"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use forge_coordination::conversation::{RoleMarkers, DEFAULT_SYSTEM_INSTRUCTION};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "http://localhost:8080/v1";
const DEFAULT_MODEL: &str = "local-model";
const DEFAULT_API_KEY: &str = "local";

const ENV_BASE_URL: &str = "FORGE_BASE_URL";
const ENV_MODEL: &str = "FORGE_MODEL";
const ENV_API_KEY: &str = "FORGE_API_KEY";
const ENV_MAX_ITERATIONS: &str = "FORGE_MAX_ITERATIONS";

/// Retry/back-off settings for one logical generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_jitter_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Token ceiling per response; absent or 0 means unbounded.
    pub max_tokens: Option<usize>,
    /// Retained user/assistant pairs.
    pub context_limit: usize,
    pub system_instruction: String,
    pub markers: RoleMarkers,
    /// Substrings that end a turn. Absent means the end/user/system tags of
    /// `markers`.
    pub completion_markers: Option<Vec<String>>,
    /// Tokens buffered before an output chunk is flushed to observers.
    pub flush_threshold: usize,
    /// Tokens between progress notifications.
    pub progress_interval: usize,
    /// Minimum response length before repetition detection applies.
    pub repetition_min_chars: usize,
    /// How long the fail-fast path waits for admission.
    pub busy_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tokens: None,
            context_limit: 10,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            markers: RoleMarkers::default(),
            completion_markers: None,
            flush_threshold: 5,
            progress_interval: 50,
            repetition_min_chars: 100,
            busy_timeout_ms: 250,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Positive token ceiling, if one is configured.
    pub fn token_ceiling(&self) -> Option<usize> {
        self.max_tokens.filter(|&n| n > 0)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Non-empty completion markers, derived from `markers` unless set.
    pub fn stop_markers(&self) -> Vec<String> {
        let markers = match &self.completion_markers {
            Some(explicit) => explicit.clone(),
            None => self.markers.completion_markers(),
        };
        markers.into_iter().filter(|m| !m.is_empty()).collect()
    }
}

/// Which model backend implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Streaming OpenAI-compatible `/completions` endpoint.
    OpenaiStream,
    /// One-shot completion through rig.
    Rig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub base_url: String,
    pub model: String,
    /// Most local servers accept any non-empty value.
    pub api_key: String,
    pub temperature: f64,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::OpenaiStream,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            temperature: 0.2,
            request_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_iterations: u32,
    pub convergence_threshold: f64,
    /// Concurrent file generations within a non-foundational group.
    pub max_parallel_files: usize,
    /// Attempts per file before a placeholder is emitted.
    pub file_attempts: u32,
    pub file_retry_delay_ms: u64,
    /// Similar files included as context when fixing a file.
    pub related_file_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            convergence_threshold: 0.95,
            max_parallel_files: 3,
            file_attempts: 3,
            file_retry_delay_ms: 0,
            related_file_limit: 3,
        }
    }
}

/// Build and test command templates for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    pub build: String,
    pub test: String,
    #[serde(default = "default_toolchain_timeout")]
    pub timeout_secs: u64,
}

fn default_toolchain_timeout() -> u64 {
    300
}

impl ToolchainConfig {
    pub fn new(build: &str, test: &str) -> Self {
        Self {
            build: build.to_string(),
            test: test.to_string(),
            timeout_secs: default_toolchain_timeout(),
        }
    }

    pub fn build_argv(&self) -> Result<Vec<String>, String> {
        split_command(&self.build)
    }

    pub fn test_argv(&self) -> Result<Vec<String>, String> {
        split_command(&self.test)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn split_command(command: &str) -> Result<Vec<String>, String> {
    match shlex::split(command) {
        Some(argv) if !argv.is_empty() => Ok(argv),
        Some(_) => Err("command is empty".to_string()),
        None => Err(format!("unbalanced quoting in command: {command}")),
    }
}

fn default_toolchains() -> BTreeMap<String, ToolchainConfig> {
    [
        (
            "rust",
            ToolchainConfig::new("cargo build --message-format=short", "cargo test"),
        ),
        ("dotnet", ToolchainConfig::new("dotnet build", "dotnet test")),
        (
            "node",
            ToolchainConfig::new("npm run build --if-present", "npm test"),
        ),
        (
            "python",
            ToolchainConfig::new("python -m compileall -q .", "python -m pytest -q"),
        ),
        ("go", ToolchainConfig::new("go build ./...", "go test ./...")),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Canonical toolchain key for a language name.
pub fn toolchain_key(language: &str) -> String {
    let lower = language.trim().to_lowercase();
    match lower.as_str() {
        "rs" => "rust".to_string(),
        "c#" | "csharp" | "cs" | ".net" | "net" => "dotnet".to_string(),
        "typescript" | "javascript" | "ts" | "js" | "nodejs" => "node".to_string(),
        "py" => "python".to_string(),
        "golang" => "go".to_string(),
        _ => lower,
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub engine: EngineConfig,
    pub backend: BackendConfig,
    pub orchestrator: OrchestratorConfig,
    /// Merged over the built-in defaults, keyed by language.
    pub toolchains: BTreeMap<String, ToolchainConfig>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            backend: BackendConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            toolchains: default_toolchains(),
        }
    }
}

impl ForgeConfig {
    /// Parse TOML; toolchains given in the file extend/override the defaults.
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let mut config: ForgeConfig = toml::from_str(raw).context("invalid config TOML")?;
        let mut toolchains = default_toolchains();
        for (language, toolchain) in std::mem::take(&mut config.toolchains) {
            toolchains.insert(toolchain_key(&language), toolchain);
        }
        config.toolchains = toolchains;
        Ok(config)
    }

    /// Load from an optional file, apply env overrides, and validate.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Apply `FORGE_*` overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.backend.base_url = url;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.backend.model = model;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.backend.api_key = key;
        }
        if let Some(raw) = lookup(ENV_MAX_ITERATIONS) {
            self.orchestrator.max_iterations = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_ITERATIONS} must be an integer, got {raw}"))?;
        }
        Ok(())
    }

    pub fn toolchain(&self, language: &str) -> Option<&ToolchainConfig> {
        self.toolchains.get(&toolchain_key(language))
    }

    pub fn validate(&self) -> Result<(), String> {
        let o = &self.orchestrator;
        if !(o.convergence_threshold > 0.0 && o.convergence_threshold <= 1.0) {
            return Err(format!(
                "convergence_threshold must be in (0, 1], got {}",
                o.convergence_threshold
            ));
        }
        if o.max_iterations == 0 {
            return Err("max_iterations must be > 0".to_string());
        }
        if o.file_attempts == 0 {
            return Err("file_attempts must be > 0".to_string());
        }
        if o.max_parallel_files == 0 {
            return Err("max_parallel_files must be > 0".to_string());
        }

        let e = &self.engine;
        if e.retry.max_attempts == 0 {
            return Err("engine.retry.max_attempts must be > 0".to_string());
        }
        if e.stop_markers().is_empty() {
            return Err("engine.completion_markers must not be empty".to_string());
        }
        if e.context_limit == 0 {
            return Err("engine.context_limit must be > 0".to_string());
        }
        if e.flush_threshold == 0 || e.progress_interval == 0 {
            return Err("engine.flush_threshold and progress_interval must be > 0".to_string());
        }

        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(format!(
                "backend.temperature must be in [0, 2], got {}",
                self.backend.temperature
            ));
        }

        for (language, toolchain) in &self.toolchains {
            toolchain
                .build_argv()
                .and_then(|_| toolchain.test_argv())
                .map_err(|e| format!("toolchains.{language}: {e}"))?;
        }
        Ok(())
    }
}
