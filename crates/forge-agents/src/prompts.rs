//! Prompt templates for file generation, repair, planning, and structured
//! output correction.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever template content changes
//! so logged outputs can be traced back to the template that produced them.

use std::fmt::Write as _;

use forge_coordination::project::{GeneratedFile, ProjectFile, ProjectImplementation};
use forge_coordination::verdict::{BuildError, FileAnalysis, MissingFile, TestFailure};

use crate::collaborators::GenerationContext;

/// Prompt version. Bump on any template change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// Outline of existing files included in creation prompts.
const MAX_LISTED_PATHS: usize = 60;
/// Characters of each context file shown to the model.
const MAX_CONTEXT_CHARS: usize = 6_000;

const OUTPUT_RULES: &str = "\
Respond with the complete file content in a single fenced code block. \
Do not include explanations before or after the block. \
Never leave TODOs, stubs, or placeholder bodies.";

fn truncated(content: &str) -> &str {
    match content.char_indices().nth(MAX_CONTEXT_CHARS) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

fn push_header(out: &mut String, ctx: &GenerationContext) {
    let _ = writeln!(out, "## Project");
    let _ = writeln!(out, "Blueprint: {}", ctx.blueprint.id);
    if !ctx.blueprint.summary.is_empty() {
        let _ = writeln!(out, "Summary: {}", ctx.blueprint.summary);
    }
    let _ = writeln!(out, "Language: {}\n", ctx.language);
    let _ = writeln!(out, "## Requirements\n{}\n", ctx.requirements.trim());
}

fn push_file(out: &mut String, heading: &str, file: &GeneratedFile) {
    let _ = writeln!(
        out,
        "### {heading}: {}\n```\n{}\n```\n",
        file.path,
        truncated(&file.content)
    );
}

fn push_related(out: &mut String, related: &[&GeneratedFile]) {
    if related.is_empty() {
        return;
    }
    let _ = writeln!(out, "## Related files");
    for file in related {
        push_file(out, "Related", file);
    }
}

/// Prompt to create one planned file from scratch.
pub fn file_creation(
    ctx: &GenerationContext,
    file: &ProjectFile,
    existing: &ProjectImplementation,
) -> String {
    let mut out = String::new();
    push_header(&mut out, ctx);

    if !existing.is_empty() {
        let _ = writeln!(out, "## Files already generated");
        for path in existing.paths().take(MAX_LISTED_PATHS) {
            let _ = writeln!(out, "- {path}");
        }
        if existing.len() > MAX_LISTED_PATHS {
            let _ = writeln!(out, "- ... and {} more", existing.len() - MAX_LISTED_PATHS);
        }
        out.push('\n');
    }

    let _ = writeln!(out, "## Task");
    let _ = writeln!(out, "Write the file `{}`.", file.path);
    if !file.purpose.is_empty() {
        let _ = writeln!(out, "Purpose: {}", file.purpose);
    }
    let _ = writeln!(
        out,
        "It must compile against the files listed above and follow {} conventions.\n",
        ctx.language
    );
    out.push_str(OUTPUT_RULES);
    out
}

/// Prompt to fix a file that failed to build.
pub fn build_fix(
    ctx: &GenerationContext,
    file: &GeneratedFile,
    errors: &[BuildError],
    related: &[&GeneratedFile],
) -> String {
    let mut out = String::new();
    push_header(&mut out, ctx);
    push_file(&mut out, "Current file", file);
    let _ = writeln!(out, "## Build errors");
    for error in errors {
        let _ = writeln!(out, "- {}", error.describe());
    }
    out.push('\n');
    push_related(&mut out, related);
    let _ = writeln!(
        out,
        "## Task\nRewrite `{}` so that every build error above is resolved \
         without breaking its public interface.\n",
        file.path
    );
    out.push_str(OUTPUT_RULES);
    out
}

/// Prompt to fix a file whose tests fail.
pub fn test_fix(
    ctx: &GenerationContext,
    file: &GeneratedFile,
    failures: &[TestFailure],
    test_sources: &[&GeneratedFile],
    related: &[&GeneratedFile],
) -> String {
    let mut out = String::new();
    push_header(&mut out, ctx);
    push_file(&mut out, "Current file", file);
    let _ = writeln!(out, "## Failing tests");
    for failure in failures {
        let _ = writeln!(out, "- {}", failure.describe());
    }
    out.push('\n');
    for source in test_sources {
        push_file(&mut out, "Test file", source);
    }
    push_related(&mut out, related);
    let _ = writeln!(
        out,
        "## Task\nRewrite `{}` so the failing tests pass. \
         Change the implementation, not the tests.\n",
        file.path
    );
    out.push_str(OUTPUT_RULES);
    out
}

/// Prompt to complete a file the analysis scored as incomplete.
pub fn improvement(
    ctx: &GenerationContext,
    file: &GeneratedFile,
    analysis: &FileAnalysis,
    related: &[&GeneratedFile],
) -> String {
    let mut out = String::new();
    push_header(&mut out, ctx);
    push_file(&mut out, "Current file", file);
    let _ = writeln!(
        out,
        "## Review\nCompleteness score: {:.2}",
        analysis.completion_score
    );
    for issue in &analysis.issues {
        let _ = writeln!(out, "- Issue: {issue}");
    }
    for feature in &analysis.missing_features {
        let _ = writeln!(out, "- Missing: {feature}");
    }
    out.push('\n');
    push_related(&mut out, related);
    let _ = writeln!(
        out,
        "## Task\nRewrite `{}` to address every issue and implement every \
         missing feature listed above.\n",
        file.path
    );
    out.push_str(OUTPUT_RULES);
    out
}

/// Turn a missing-file verdict into a planned file.
pub fn planned_from_missing(missing: &MissingFile) -> ProjectFile {
    let purpose = match (missing.purpose.is_empty(), missing.description.is_empty()) {
        (false, _) => missing.purpose.clone(),
        (true, false) => missing.description.clone(),
        (true, true) => "Required by the project but not yet generated".to_string(),
    };
    ProjectFile::new(missing.path.clone(), purpose)
}

/// Prompt asking for the project file structure as JSON.
pub fn structure_plan(ctx: &GenerationContext, schema: &str) -> String {
    let mut out = String::new();
    push_header(&mut out, ctx);
    let _ = writeln!(
        out,
        "## Task\nList every file needed to implement the requirements, including \
         project configuration and tests. Use paths relative to the project root.\n"
    );
    let _ = writeln!(
        out,
        "Respond with a JSON array only, where each element matches this schema:\n```json\n{schema}\n```"
    );
    out
}

/// Re-prompt after structured output failed to parse.
pub fn corrective_json(original_prompt: &str, output: &str, error: &str) -> String {
    format!(
        "{original_prompt}\n\n## Correction\nYour previous response could not be parsed.\n\
         Parse error: {error}\n\nPrevious response:\n```\n{}\n```\n\n\
         Respond again with valid JSON only, no commentary.",
        truncated(output)
    )
}

/// Wrap a yes/no question so replies stay short.
pub fn yes_no(question: &str) -> String {
    format!("{question}\n\nAnswer with \"yes\" or \"no\" first, then at most one sentence.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_coordination::project::Blueprint;

    fn ctx() -> GenerationContext {
        GenerationContext::new(
            "Track users and orders.",
            Blueprint::new("shop").with_summary("A small shop"),
            "rust",
        )
    }

    #[test]
    fn creation_prompt_lists_existing_files() {
        let mut imp = ProjectImplementation::new("shop");
        imp.upsert(GeneratedFile::new("src/models/user.rs", "pub struct User;"));
        let prompt = file_creation(
            &ctx(),
            &ProjectFile::new("src/services/user_service.rs", "User CRUD"),
            &imp,
        );
        assert!(prompt.contains("- src/models/user.rs"));
        assert!(prompt.contains("Write the file `src/services/user_service.rs`"));
        assert!(prompt.contains("Purpose: User CRUD"));
        assert!(prompt.contains("Track users and orders."));
    }

    #[test]
    fn build_fix_prompt_includes_errors_and_related() {
        let file = GeneratedFile::new("src/a.rs", "fn a() {}");
        let related = GeneratedFile::new("src/b.rs", "fn b() {}");
        let prompt = build_fix(
            &ctx(),
            &file,
            &[BuildError::new("src/a.rs", 3, "unknown type")],
            &[&related],
        );
        assert!(prompt.contains("src/a.rs:3: unknown type"));
        assert!(prompt.contains("Related: src/b.rs"));
    }

    #[test]
    fn missing_file_purpose_fallbacks() {
        let missing = MissingFile {
            path: "src/x.rs".into(),
            description: "desc".into(),
            purpose: String::new(),
        };
        assert_eq!(planned_from_missing(&missing).purpose, "desc");
    }

    #[test]
    fn corrective_prompt_carries_error() {
        let prompt = corrective_json("Give JSON", "not json", "expected value at line 1");
        assert!(prompt.starts_with("Give JSON"));
        assert!(prompt.contains("expected value at line 1"));
        assert!(prompt.contains("not json"));
    }
}
