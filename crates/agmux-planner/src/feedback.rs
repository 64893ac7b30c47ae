//! Review feedback rendering (spec §4.7.3): a numbered list the builder
//! receives verbatim as its next prompt.

use crate::types::{ReviewResponse, Severity};

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "CRITICAL",
        Severity::Major => "MAJOR",
        Severity::Minor => "MINOR",
        Severity::Info => "INFO",
    }
}

/// Renders a review as `N. [severity] message` + optional `File: path[:line]`
/// + optional `Suggestion: ...` (spec §4.7.3).
pub fn format_feedback(review: &ReviewResponse) -> String {
    let mut out = String::new();
    for (i, issue) in review.issues.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("{}. [{}] {}", i + 1, severity_label(issue.severity), issue.message));
        if let Some(file) = &issue.file {
            out.push('\n');
            match issue.line {
                Some(line) => out.push_str(&format!("File: {file}:{line}")),
                None => out.push_str(&format!("File: {file}")),
            }
        }
        if let Some(suggestion) = &issue.suggestion {
            out.push('\n');
            out.push_str(&format!("Suggestion: {suggestion}"));
        }
    }
    out
}
