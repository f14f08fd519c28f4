//! Structure planners.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use forge_coordination::project::ProjectFile;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::collaborators::{GenerationContext, StructurePlanner};
use crate::engine::GenerationEngine;
use crate::errors::{ForgeError, ForgeResult};
use crate::prompts;

/// JSON schema of the plan the model is asked to return.
pub fn plan_schema() -> String {
    let schema = schemars::schema_for!(ProjectFile);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
}

/// Normalize a raw plan: forward slashes, no leading `./`, no duplicates,
/// no empty paths.
pub fn normalize_plan(files: Vec<ProjectFile>) -> Vec<ProjectFile> {
    let mut seen = std::collections::HashSet::new();
    files
        .into_iter()
        .filter_map(|file| {
            let path = file.path.replace('\\', "/");
            let path = path.trim().trim_start_matches("./").to_string();
            if path.is_empty() || !seen.insert(path.clone()) {
                return None;
            }
            Some(ProjectFile::new(path, file.purpose))
        })
        .collect()
}

/// Asks the model for the file structure.
pub struct LlmStructurePlanner {
    engine: Arc<GenerationEngine>,
}

impl LlmStructurePlanner {
    pub fn new(engine: Arc<GenerationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StructurePlanner for LlmStructurePlanner {
    async fn plan(
        &self,
        ctx: &GenerationContext,
        cancel: &CancellationToken,
    ) -> ForgeResult<Vec<ProjectFile>> {
        let prompt = prompts::structure_plan(ctx, &plan_schema());
        let files: Vec<ProjectFile> = self.engine.generate_structured(&prompt, cancel).await?;
        let files = normalize_plan(files);
        if files.is_empty() {
            return Err(ForgeError::InvalidInput("planner returned no files".into()));
        }
        info!(files = files.len(), "Planned project structure");
        Ok(files)
    }
}

/// A plan supplied up front, usually from a JSON file.
#[derive(Debug, Clone)]
pub struct StaticPlanner {
    files: Vec<ProjectFile>,
}

impl StaticPlanner {
    pub fn new(files: Vec<ProjectFile>) -> Self {
        Self {
            files: normalize_plan(files),
        }
    }

    pub fn from_json(raw: &str) -> ForgeResult<Self> {
        let files: Vec<ProjectFile> = serde_json::from_str(raw)
            .map_err(|e| ForgeError::InvalidInput(format!("plan JSON: {e}")))?;
        Ok(Self::new(files))
    }

    pub fn from_path(path: &Path) -> ForgeResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ForgeError::InvalidInput(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn files(&self) -> &[ProjectFile] {
        &self.files
    }
}

#[async_trait]
impl StructurePlanner for StaticPlanner {
    async fn plan(
        &self,
        _ctx: &GenerationContext,
        cancel: &CancellationToken,
    ) -> ForgeResult<Vec<ProjectFile>> {
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }
        Ok(self.files.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_plan_normalizes_paths() {
        let planner = StaticPlanner::from_json(
            r#"[
                {"path": "./src/models/user.rs", "purpose": "User model"},
                {"path": "src\\models\\user.rs", "description": "duplicate"},
                {"path": "  ", "purpose": "blank"},
                {"path": "src/main.rs", "description": "Entry point"}
            ]"#,
        )
        .unwrap();
        let paths: Vec<&str> = planner.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/models/user.rs", "src/main.rs"]);
        assert_eq!(planner.files()[1].purpose, "Entry point");
        assert_eq!(planner.files()[1].name, "main.rs");
    }

    #[test]
    fn invalid_plan_json_is_input_error() {
        assert!(matches!(
            StaticPlanner::from_json("not json"),
            Err(ForgeError::InvalidInput(_))
        ));
    }

    #[test]
    fn schema_mentions_path() {
        assert!(plan_schema().contains("\"path\""));
    }
}
