//! Placeholder files emitted when generation keeps failing.
//!
//! A placeholder preserves pipeline progress: the file exists, states what
//! it was meant to contain, carries the terminal error, and is flagged so
//! the refinement loop and the caller can tell it apart from real output.

use super::{CommentStyle, FileType, GeneratedFile, ProjectFile};

/// Build a placeholder for `file` after `attempts` failed generations.
pub fn placeholder_file(file: &ProjectFile, error: &str, attempts: u32) -> GeneratedFile {
    let file_type = FileType::from_path(&file.path);
    let purpose = if file.purpose.trim().is_empty() {
        "(no description provided)"
    } else {
        file.purpose.trim()
    };

    let lines = [
        format!("PLACEHOLDER: {}", file.path),
        format!("Purpose: {purpose}"),
        format!("Generation failed after {attempts} attempt(s)."),
        format!("Last error: {}", single_line(error)),
        "This file must be regenerated before the project is complete.".to_string(),
    ];

    let content = render(file_type, &file.path, &lines);

    let mut generated = GeneratedFile::new(file.path.clone(), content)
        .with_retry_count(attempts.saturating_sub(1));
    generated.metadata.error = true;
    generated.metadata.error_message = Some(error.to_string());
    generated
}

fn render(file_type: FileType, path: &str, lines: &[String]) -> String {
    match file_type.comment_style() {
        CommentStyle::Line(marker) => lines
            .iter()
            .map(|line| format!("{marker} {line}\n"))
            .collect(),
        CommentStyle::Block(open, prefix, close) => {
            let mut out = format!("{open}\n");
            for line in lines {
                out.push_str(&format!("{prefix} {line}\n"));
            }
            out.push_str(close);
            out.push('\n');
            out
        }
        CommentStyle::None => {
            let body = serde_json::json!({
                "_placeholder": path,
                "_comment": lines,
            });
            serde_json::to_string_pretty(&body).unwrap_or_default() + "\n"
        }
    }
}

fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_placeholder_is_line_commented() {
        let file = ProjectFile::new("src/services/billing.rs", "Billing service");
        let placeholder = placeholder_file(&file, "backend timed out", 3);

        assert!(placeholder.is_placeholder());
        assert_eq!(placeholder.metadata.retry_count, 2);
        assert!(placeholder.content.contains("src/services/billing.rs"));
        assert!(placeholder.content.contains("backend timed out"));
        assert!(placeholder.content.lines().all(|l| l.starts_with("//")));
    }

    #[test]
    fn python_and_html_use_their_comment_syntax() {
        let py = placeholder_file(&ProjectFile::new("app/main.py", ""), "boom", 3);
        assert!(py.content.starts_with("# PLACEHOLDER: app/main.py"));

        let html = placeholder_file(&ProjectFile::new("web/index.html", ""), "boom", 3);
        assert!(html.content.starts_with("<!--\n"));
        assert!(html.content.trim_end().ends_with("-->"));
    }

    #[test]
    fn json_placeholder_stays_valid_json() {
        let file = ProjectFile::new("config/appsettings.json", "Settings");
        let placeholder = placeholder_file(&file, "line one\nline two", 3);
        let parsed: serde_json::Value = serde_json::from_str(&placeholder.content).unwrap();
        assert_eq!(parsed["_placeholder"], "config/appsettings.json");
        assert!(placeholder.content.contains("line one | line two"));
    }
}
