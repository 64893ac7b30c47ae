//! Human-oriented `content` formatting for `tool_start`/`tool_result` lines
//! (spec §4.5.2). Display-only; never affects `tool_input`/`tool_result`.
//! Dispatches per tool name into a small formatting table; see `DESIGN.md`
//! for the path-truncation-preserving-basename rule.

use serde_json::{Map, Value};

const PATH_LIMIT: usize = 50;
const BASH_LIMIT: usize = 50;
const GREP_LIMIT: usize = 40;
const TASK_LIMIT: usize = 40;

/// Rune-based (char-based) truncation: never splits a multi-byte code
/// point. Appends `"..."` when truncated.
fn truncate_chars(s: &str, limit: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= limit {
        return s.to_string();
    }
    let mut out: String = chars[..limit].iter().collect();
    out.push_str("...");
    out
}

/// Truncates a path, preserving the trailing filename when possible: if
/// `".../<basename>"` fits within `limit` runes, use it; otherwise hard-cut
/// at `limit + 7` runes and append `"..."` (spec §4.5.2: "hard-cut at 57
/// else", with `limit` = 50).
fn truncate_path(path: &str, limit: usize) -> String {
    let chars: Vec<char> = path.chars().collect();
    if chars.len() <= limit {
        return path.to_string();
    }

    if let Some(basename) = path.rsplit('/').next() {
        let candidate = format!(".../{basename}");
        if candidate.chars().count() <= limit {
            return candidate;
        }
    }

    let hard_cut = limit + 7;
    let mut out: String = chars[..hard_cut.min(chars.len())].iter().collect();
    out.push_str("...");
    out
}

fn str_field<'a>(input: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

/// Formats the display `content` for a `tool_start`/`tool_result` line from
/// its tool `name` and `input` map (spec §4.5.2 table).
pub fn format_tool_content(name: &str, input: &Map<String, Value>) -> String {
    match name {
        "Read" => {
            let path = str_field(input, "file_path").or_else(|| str_field(input, "path")).unwrap_or("");
            format!("Read {}", truncate_path(path, PATH_LIMIT))
        }
        "Write" | "Edit" => {
            let path = str_field(input, "file_path").or_else(|| str_field(input, "path")).unwrap_or("");
            format!("Write → {}", truncate_path(path, PATH_LIMIT))
        }
        "Bash" => {
            let command = str_field(input, "command").unwrap_or("");
            format!("Bash: {}", truncate_chars(command, BASH_LIMIT))
        }
        "Glob" => {
            let pattern = str_field(input, "pattern").unwrap_or("");
            format!("Glob {pattern}")
        }
        "Grep" => {
            let pattern = str_field(input, "pattern").unwrap_or("");
            format!("Grep {}", truncate_chars(pattern, GREP_LIMIT))
        }
        "Task" => {
            let description = str_field(input, "description").unwrap_or("");
            format!("Task: {}", truncate_chars(description, TASK_LIMIT))
        }
        other => other.to_string(),
    }
}
