//! Custom assertions for agmux-specific invariants, giving test failures a
//! readable message instead of a bare `assert!`.

use agmux_types::{OutputLine, OutputLineType, SessionStatus};

/// Panics with a readable message unless `status` is one of the terminal
/// states (spec §3 "the terminal set is `{Completed, Failed, Stopped}`").
pub fn assert_terminal(status: SessionStatus) {
    assert!(status.is_terminal(), "expected a terminal status, got {status:?}");
}

/// Panics unless `status` is non-terminal.
pub fn assert_not_terminal(status: SessionStatus) {
    assert!(!status.is_terminal(), "expected a non-terminal status, got {status:?}");
}

/// Finds the single line of `line_type` with the given substring in its
/// content, panicking with the full buffer printed if none match — more
/// useful than a bare `assert!(lines.iter().any(...))` when a test fails.
pub fn assert_output_contains<'a>(
    lines: &'a [OutputLine],
    line_type: OutputLineType,
    needle: &str,
) -> &'a OutputLine {
    lines
        .iter()
        .find(|l| l.line_type == line_type && l.content.contains(needle))
        .unwrap_or_else(|| {
            panic!("no {line_type:?} line containing {needle:?} found in {lines:#?}")
        })
}

/// Asserts no two adjacent lines are both streamable text-like with the
/// same `line_type` (spec §4.4.2: adjacent streaming deltas must already be
/// merged by the buffer, never represented as separate lines).
pub fn assert_no_unmerged_adjacent_text(lines: &[OutputLine]) {
    for pair in lines.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(
            !(a.is_streamable_text_like() && a.line_type == b.line_type),
            "adjacent unmerged {:?} lines: {a:?} / {b:?}",
            a.line_type,
        );
    }
}
