//! `FileGenerator` backed by the generation engine.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use forge_coordination::project::{GeneratedFile, ProjectFile, ProjectImplementation};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::collaborators::{
    FileGenerator, GenerationContext, RevisionReason, RevisionRequest,
};
use crate::engine::GenerationEngine;
use crate::errors::{ForgeResult, GenerationError};
use crate::prompts;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+.#-]*[ \t]*\r?\n(.*?)\r?\n?```")
        .expect("FENCED_BLOCK regex should compile")
});

/// Body of the first fenced code block, or the trimmed reply when the model
/// did not fence its answer.
pub fn extract_code(reply: &str) -> String {
    match FENCED_BLOCK.captures(reply).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().to_string(),
        None => reply.trim().to_string(),
    }
}

pub struct LlmFileGenerator {
    engine: Arc<GenerationEngine>,
}

impl LlmFileGenerator {
    pub fn new(engine: Arc<GenerationEngine>) -> Self {
        Self { engine }
    }

    async fn complete(&self, prompt: &str, cancel: &CancellationToken) -> ForgeResult<String> {
        let reply = self.engine.generate_with_cancel(prompt, cancel).await?;
        let code = extract_code(&reply);
        if code.trim().is_empty() {
            return Err(GenerationError::EmptyResponse.into());
        }
        Ok(code)
    }
}

#[async_trait]
impl FileGenerator for LlmFileGenerator {
    async fn create_file(
        &self,
        ctx: &GenerationContext,
        file: &ProjectFile,
        existing: &ProjectImplementation,
        cancel: &CancellationToken,
    ) -> ForgeResult<GeneratedFile> {
        let prompt = prompts::file_creation(ctx, file, existing);
        let content = self.complete(&prompt, cancel).await?;
        debug!(path = %file.path, chars = content.len(), "Generated file");
        Ok(GeneratedFile::new(file.path.clone(), content))
    }

    async fn revise_file(
        &self,
        ctx: &GenerationContext,
        request: RevisionRequest<'_>,
        cancel: &CancellationToken,
    ) -> ForgeResult<String> {
        let prompt = match request.reason {
            RevisionReason::BuildErrors(errors) => {
                prompts::build_fix(ctx, request.file, errors, request.related)
            }
            RevisionReason::TestFailures {
                failures,
                test_sources,
            } => prompts::test_fix(ctx, request.file, failures, test_sources, request.related),
            RevisionReason::Incomplete(analysis) => {
                prompts::improvement(ctx, request.file, analysis, request.related)
            }
        };
        debug!(path = %request.file.path, reason = request.reason.label(), "Revising file");
        self.complete(&prompt, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_fenced_block() {
        let reply = "Here you go:\n```rust\nfn main() {}\n```\nAnything else?";
        assert_eq!(extract_code(reply), "fn main() {}");
    }

    #[test]
    fn unfenced_reply_is_trimmed() {
        assert_eq!(extract_code("\n  pub struct A;\n"), "pub struct A;");
    }

    #[test]
    fn language_tag_with_symbols() {
        let reply = "```c#\nclass A {}\n```";
        assert_eq!(extract_code(reply), "class A {}");
    }
}
