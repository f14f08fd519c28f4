use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::metrics::{IterationMetrics, MetricsLog};

/// Hex-encoded blake3 digest of file content.
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Identifies the architecture the files are generated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: String,
    /// Architecture summary handed to the model as context.
    #[serde(default)]
    pub summary: String,
    /// Target language / toolchain key (e.g. `"rust"`, `"dotnet"`).
    #[serde(default)]
    pub language: Option<String>,
}

impl Blueprint {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            summary: String::new(),
            language: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// A file the structure planner expects to exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ProjectFile {
    /// Relative path within the project (forward slashes).
    pub path: String,
    /// File name without directories.
    #[serde(default)]
    pub name: String,
    /// What the file is for.
    #[serde(default, alias = "description")]
    pub purpose: String,
}

impl ProjectFile {
    pub fn new(path: impl Into<String>, purpose: impl Into<String>) -> Self {
        let path = path.into();
        let name = file_name_of(&path);
        Self {
            path,
            name,
            purpose: purpose.into(),
        }
    }

    /// File name, derived from the path when the planner left it empty.
    pub fn file_name(&self) -> String {
        if self.name.is_empty() {
            file_name_of(&self.path)
        } else {
            self.name.clone()
        }
    }
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Language / format family of a file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Rust,
    CSharp,
    TypeScript,
    JavaScript,
    Python,
    Go,
    Java,
    Sql,
    Shell,
    Html,
    Css,
    Xml,
    Json,
    Yaml,
    Toml,
    Markdown,
    Text,
}

impl FileType {
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "rs" => Self::Rust,
            "cs" => Self::CSharp,
            "ts" | "tsx" => Self::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "py" => Self::Python,
            "go" => Self::Go,
            "java" | "kt" => Self::Java,
            "sql" => Self::Sql,
            "sh" | "bash" => Self::Shell,
            "html" | "htm" | "cshtml" | "razor" => Self::Html,
            "css" | "scss" => Self::Css,
            "xml" | "csproj" | "props" | "config" => Self::Xml,
            "json" => Self::Json,
            "yaml" | "yml" => Self::Yaml,
            "toml" => Self::Toml,
            "md" => Self::Markdown,
            _ => Self::Text,
        }
    }

    /// Opening/closing delimiters and per-line prefix for a comment block.
    ///
    /// JSON has no comments; placeholders there use a `"_comment"` object
    /// built by the placeholder module instead.
    pub fn comment_style(self) -> CommentStyle {
        match self {
            Self::Rust
            | Self::CSharp
            | Self::TypeScript
            | Self::JavaScript
            | Self::Go
            | Self::Java => CommentStyle::Line("//"),
            Self::Css => CommentStyle::Block("/*", " *", " */"),
            Self::Python | Self::Shell | Self::Yaml | Self::Toml | Self::Text => {
                CommentStyle::Line("#")
            }
            Self::Sql => CommentStyle::Line("--"),
            Self::Html | Self::Xml | Self::Markdown => CommentStyle::Block("<!--", "  ", "-->"),
            Self::Json => CommentStyle::None,
        }
    }

    /// Whether this file type is compiled / executed (vs. data or docs).
    pub fn is_source(self) -> bool {
        matches!(
            self,
            Self::Rust
                | Self::CSharp
                | Self::TypeScript
                | Self::JavaScript
                | Self::Python
                | Self::Go
                | Self::Java
        )
    }
}

/// How a comment block is rendered for a `FileType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// Every line prefixed with the marker.
    Line(&'static str),
    /// Opening delimiter, per-line prefix, closing delimiter.
    Block(&'static str, &'static str, &'static str),
    None,
}

/// Per-file generation bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Extra attempts needed before the content was accepted.
    pub retry_count: u32,
    /// Set when the file is a placeholder emitted after repeated failures.
    pub error: bool,
    /// Terminal error message behind a placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Refinement iteration that last rewrote the file (0 = initial pass).
    pub revision: u32,
    /// blake3 digest of `content`.
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// A file realised by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub file_name: String,
    pub content: String,
    pub file_type: FileType,
    pub generated_at: DateTime<Utc>,
    pub metadata: FileMetadata,
}

impl GeneratedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let content = content.into();
        Self {
            file_name: file_name_of(&path),
            file_type: FileType::from_path(&path),
            generated_at: Utc::now(),
            metadata: FileMetadata {
                content_hash: content_hash(&content),
                ..FileMetadata::default()
            },
            path,
            content,
        }
    }

    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.metadata.retry_count = retries;
        self
    }

    pub fn with_revision(mut self, revision: u32) -> Self {
        self.metadata.revision = revision;
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.metadata.error
    }

    /// Replace the content, keeping identity and refreshing hash/timestamp.
    ///
    /// Returns `false` when the new content is byte-identical.
    pub fn revise(&mut self, content: String, revision: u32) -> bool {
        let hash = content_hash(&content);
        let changed = hash != self.metadata.content_hash;
        self.content = content;
        self.generated_at = Utc::now();
        self.metadata.content_hash = hash;
        self.metadata.revision = revision;
        self.metadata.error = false;
        self.metadata.error_message = None;
        changed
    }

    /// File name without extension, used for fuzzy association.
    pub fn stem(&self) -> &str {
        self.file_name
            .split_once('.')
            .map_or(self.file_name.as_str(), |(stem, _)| stem)
    }

    /// Parent directory of the path (empty at project root).
    pub fn directory(&self) -> &str {
        self.path.rsplit_once('/').map_or("", |(dir, _)| dir)
    }
}

/// Implementation-wide bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImplementationMetadata {
    pub created_at: Option<DateTime<Utc>>,
    pub initial_generation_completed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Refinement iterations actually executed.
    pub refinement_iterations: u32,
    pub final_completeness_score: Option<f64>,
    pub converged: bool,
    /// Why the refinement loop stopped, when it did not converge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    pub iteration_metrics: MetricsLog,
}

/// The evolving set of generated files for one blueprint.
///
/// Files are keyed by path. `Clone` is a deep copy, which the refinement
/// loop relies on to keep the last accepted state intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectImplementation {
    pub blueprint_id: String,
    files: BTreeMap<String, GeneratedFile>,
    pub metadata: ImplementationMetadata,
}

impl ProjectImplementation {
    pub fn new(blueprint_id: impl Into<String>) -> Self {
        Self {
            blueprint_id: blueprint_id.into(),
            files: BTreeMap::new(),
            metadata: ImplementationMetadata {
                created_at: Some(Utc::now()),
                ..ImplementationMetadata::default()
            },
        }
    }

    /// Insert or replace the file at `file.path`. Returns the previous file.
    pub fn upsert(&mut self, file: GeneratedFile) -> Option<GeneratedFile> {
        self.files.insert(file.path.clone(), file)
    }

    pub fn get(&self, path: &str) -> Option<&GeneratedFile> {
        self.files.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut GeneratedFile> {
        self.files.get_mut(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn files(&self) -> impl Iterator<Item = &GeneratedFile> {
        self.files.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn placeholder_count(&self) -> usize {
        self.files.values().filter(|f| f.is_placeholder()).count()
    }

    pub fn record_iteration(&mut self, metrics: IterationMetrics) {
        self.metadata.iteration_metrics.push(metrics);
    }
}
