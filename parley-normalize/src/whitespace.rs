//! Final whitespace cleanup.

use crate::StageOutput;

/// Collapse every run of two or more whitespace characters into one space,
/// trim each line, then trim the whole text.
///
/// The count is the number of characters removed. Since a collapsed run
/// becomes a single space, line breaks inside such a run are flattened too.
pub fn cleanup_whitespace(text: &str) -> StageOutput {
    let mut collapsed = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_whitespace() && chars.peek().is_some_and(|n| n.is_whitespace()) {
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
            collapsed.push(' ');
        } else {
            collapsed.push(c);
        }
    }

    let trimmed = collapsed
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned();

    let removed = text.chars().count() - trimmed.chars().count();
    StageOutput::new(trimmed, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_runs() {
        let out = cleanup_whitespace("a   b\t\tc");
        assert_eq!(out.text, "a b c");
        assert_eq!(out.count, 3);
    }

    #[test]
    fn single_line_breaks_survive() {
        let out = cleanup_whitespace("첫 줄\n둘째 줄");
        assert_eq!(out.text, "첫 줄\n둘째 줄");
        assert_eq!(out.count, 0);
    }

    #[test]
    fn blank_lines_flatten() {
        assert_eq!(cleanup_whitespace("위\n\n아래").text, "위 아래");
    }

    #[test]
    fn trims_lines_and_ends() {
        let out = cleanup_whitespace("  앞\n뒤 ");
        assert_eq!(out.text, "앞\n뒤");
        assert_eq!(out.count, 3);
    }

    #[test]
    fn idempotent() {
        let once = cleanup_whitespace(" a \n  b   c \t").text;
        let twice = cleanup_whitespace(&once);
        assert_eq!(twice.text, once);
        assert_eq!(twice.count, 0);
    }

    #[test]
    fn empty_input() {
        let out = cleanup_whitespace("   ");
        assert_eq!(out.text, "");
        assert_eq!(out.count, 3);
    }
}
