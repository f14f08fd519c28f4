//! Priority grouping of planned files.
//!
//! Files are bucketed by path/name heuristics into ordered groups. The
//! orchestrator generates foundational groups one file at a time (later
//! files may lean on earlier ones) and fans the rest out concurrently.

use serde::{Deserialize, Serialize};

use super::ProjectFile;

/// Generation priority group, in generation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    CoreModels,
    Interfaces,
    DataAccess,
    Services,
    Controllers,
    Configuration,
    Tests,
    Other,
}

impl GroupKind {
    pub const ALL: [GroupKind; 8] = [
        Self::CoreModels,
        Self::Interfaces,
        Self::DataAccess,
        Self::Services,
        Self::Controllers,
        Self::Configuration,
        Self::Tests,
        Self::Other,
    ];

    /// Foundational groups are generated strictly sequentially.
    pub fn is_foundational(self) -> bool {
        matches!(self, Self::CoreModels | Self::Interfaces | Self::DataAccess)
    }

    /// Classify a file by its path and name.
    pub fn classify(file: &ProjectFile) -> Self {
        Self::classify_path(&file.path)
    }

    /// Classify from whole words of the path, so `review.rs` is not a view
    /// and `portrait.rs` is not a trait.
    pub fn classify_path(path: &str) -> Self {
        let normalized = path.replace('\\', "/");
        let original_name = normalized.rsplit('/').next().unwrap_or(&normalized);
        let name = original_name.to_ascii_lowercase();
        let words = path_words(&normalized);

        let has = |keys: &[&str]| words.iter().any(|w| keys.contains(&w.as_str()));
        let has_pair = |first: &str, second: &str| {
            words.windows(2).any(|pair| pair[0] == first && pair[1] == second)
        };

        if has(&["test", "tests", "spec", "specs"]) {
            return Self::Tests;
        }

        if has(&[
            "model", "models", "entity", "entities", "domain", "dto", "dtos", "schema", "schemas",
            "types",
        ]) {
            return Self::CoreModels;
        }

        if has(&[
            "interface",
            "interfaces",
            "contract",
            "contracts",
            "abstraction",
            "abstractions",
            "trait",
            "traits",
            "ports",
        ]) || is_prefixed_interface(original_name)
        {
            return Self::Interfaces;
        }

        if has(&[
            "repository",
            "repositories",
            "repo",
            "repos",
            "dbcontext",
            "migration",
            "migrations",
            "data",
            "dal",
            "db",
            "database",
            "store",
            "stores",
        ]) {
            return Self::DataAccess;
        }

        if has(&[
            "service", "services", "manager", "managers", "handler", "handlers", "usecase",
            "usecases", "worker", "workers",
        ]) || has_pair("use", "case")
        {
            return Self::Services;
        }

        if has(&[
            "controller",
            "controllers",
            "endpoint",
            "endpoints",
            "route",
            "routes",
            "router",
            "api",
            "view",
            "views",
        ]) {
            return Self::Controllers;
        }

        let config_names = ["cargo.toml", "package.json", "go.mod", "lib.rs"];
        let config_exts = [".json", ".yaml", ".yml", ".toml", ".csproj"];
        if has(&[
            "config",
            "configs",
            "configuration",
            "settings",
            "appsettings",
            "program",
            "startup",
            "main",
            "pyproject",
        ]) || config_names.contains(&name.as_str())
            || config_exts.iter().any(|ext| name.ends_with(ext))
            || name.starts_with(".env")
        {
            return Self::Configuration;
        }

        Self::Other
    }
}

/// Lowercase words of a path: split on separators, punctuation, and
/// camel-case boundaries (`UsersController` gives `users`, `controller`).
fn path_words(path: &str) -> Vec<String> {
    let mut words = Vec::new();
    for part in path.split(|c: char| !c.is_ascii_alphanumeric()) {
        let chars: Vec<char> = part.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            let boundary = c.is_ascii_uppercase()
                && i > 0
                && (chars[i - 1].is_ascii_lowercase()
                    || chars[i - 1].is_ascii_digit()
                    || (chars[i - 1].is_ascii_uppercase()
                        && chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase())));
            if boundary && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            current.push(c.to_ascii_lowercase());
        }
        if !current.is_empty() {
            words.push(current);
        }
    }
    words
}

/// C#-style `IUserRepository.cs` naming.
fn is_prefixed_interface(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('I'), Some(second)) if second.is_ascii_uppercase()
    )
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CoreModels => write!(f, "core_models"),
            Self::Interfaces => write!(f, "interfaces"),
            Self::DataAccess => write!(f, "data_access"),
            Self::Services => write!(f, "services"),
            Self::Controllers => write!(f, "controllers"),
            Self::Configuration => write!(f, "configuration"),
            Self::Tests => write!(f, "tests"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A non-empty batch of planned files sharing a priority.
#[derive(Debug, Clone)]
pub struct FileGroup {
    pub kind: GroupKind,
    pub files: Vec<ProjectFile>,
}

impl FileGroup {
    pub fn is_foundational(&self) -> bool {
        self.kind.is_foundational()
    }
}

/// Partition planned files into ordered, non-empty priority groups.
///
/// Duplicate paths are collapsed; within a group files are sorted by path.
pub fn partition(files: &[ProjectFile]) -> Vec<FileGroup> {
    let mut seen = std::collections::HashSet::new();
    let mut groups: Vec<FileGroup> = GroupKind::ALL
        .iter()
        .map(|&kind| FileGroup {
            kind,
            files: Vec::new(),
        })
        .collect();

    for file in files {
        if !seen.insert(file.path.as_str()) {
            continue;
        }
        let kind = GroupKind::classify(file);
        if let Some(group) = groups.iter_mut().find(|g| g.kind == kind) {
            group.files.push(file.clone());
        }
    }

    groups.retain(|g| !g.files.is_empty());
    for group in &mut groups {
        group.files.sort_by(|a, b| a.path.cmp(&b.path));
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pf(path: &str) -> ProjectFile {
        ProjectFile::new(path, "")
    }

    #[test]
    fn classifies_common_layouts() {
        let cases = [
            ("src/Models/User.cs", GroupKind::CoreModels),
            ("src/domain/order.rs", GroupKind::CoreModels),
            ("src/Contracts/IUserRepository.cs", GroupKind::Interfaces),
            ("src/Abstractions/IClock.cs", GroupKind::Interfaces),
            ("src/Data/AppDbContext.cs", GroupKind::DataAccess),
            ("src/repository/user_repo.rs", GroupKind::DataAccess),
            ("src/services/billing.py", GroupKind::Services),
            ("src/Controllers/UsersController.cs", GroupKind::Controllers),
            ("appsettings.json", GroupKind::Configuration),
            ("Cargo.toml", GroupKind::Configuration),
            ("src/main.rs", GroupKind::Configuration),
            ("tests/test_billing.py", GroupKind::Tests),
            ("src/app.spec.ts", GroupKind::Tests),
            ("Tests/UserServiceTests.cs", GroupKind::Tests),
            ("src/latest.rs", GroupKind::Other),
            ("README.md", GroupKind::Other),
        ];
        for (path, expected) in cases {
            assert_eq!(GroupKind::classify_path(path), expected, "{path}");
        }
    }

    #[test]
    fn keywords_inside_other_words_do_not_match() {
        let cases = [
            ("src/review.rs", GroupKind::Other),
            ("src/components/preview.ts", GroupKind::Other),
            ("src/portrait.rs", GroupKind::Other),
            ("src/contest.rs", GroupKind::Other),
            ("src/views/home.ts", GroupKind::Controllers),
            ("src/traits/clock.rs", GroupKind::Interfaces),
            ("src/use_case/checkout.py", GroupKind::Services),
            ("src/HTTPRouter.go", GroupKind::Controllers),
        ];
        for (path, expected) in cases {
            assert_eq!(GroupKind::classify_path(path), expected, "{path}");
        }
    }

    #[test]
    fn path_words_split_camel_case() {
        assert_eq!(
            path_words("src/Data/AppDbContext.cs"),
            vec!["src", "data", "app", "db", "context", "cs"]
        );
        assert_eq!(path_words("IUserRepository"), vec!["i", "user", "repository"]);
        assert_eq!(path_words("HTTPServer"), vec!["http", "server"]);
    }

    #[test]
    fn test_files_win_over_domain_words() {
        assert_eq!(
            GroupKind::classify_path("tests/models/user_test.rs"),
            GroupKind::Tests
        );
    }

    #[test]
    fn partition_orders_groups_and_drops_empty() {
        let files = vec![
            pf("tests/user_test.rs"),
            pf("src/services/user_service.rs"),
            pf("src/models/user.rs"),
            pf("src/models/account.rs"),
        ];
        let groups = partition(&files);
        let kinds: Vec<GroupKind> = groups.iter().map(|g| g.kind).collect();
        assert_eq!(
            kinds,
            vec![GroupKind::CoreModels, GroupKind::Services, GroupKind::Tests]
        );
        assert_eq!(groups[0].files[0].path, "src/models/account.rs");
        assert!(groups[0].is_foundational());
        assert!(!groups[1].is_foundational());
    }

    #[test]
    fn partition_collapses_duplicate_paths() {
        let files = vec![pf("src/models/a.rs"), pf("src/models/a.rs")];
        let groups = partition(&files);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].files.len(), 1);
    }
}
