//! Parser input, line/column resolution and error excerpts.

use std::sync::Arc;

use unicode_width::UnicodeWidthStr;

use crate::value::{repr_bytes, Position, Value};

/// Input to a generated parser: text or raw bytes.
///
/// Positions are byte offsets either way.
#[derive(Debug, Clone)]
pub enum Text {
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
}

impl Text {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Text::Str(s) => s.as_bytes(),
            Text::Bytes(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Text::Bytes(_))
    }

    /// The input between two offsets as a string or bytes value.
    pub fn slice(&self, start: usize, end: usize) -> Value {
        match self {
            Text::Str(s) => match s.get(start..end) {
                Some(part) => Value::str(part),
                None => Value::from(String::from_utf8_lossy(&s.as_bytes()[start..end]).into_owned()),
            },
            Text::Bytes(b) => Value::bytes(&b[start..end]),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Text::Str(s) => Some(s),
            Text::Bytes(_) => None,
        }
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Text::Str(Arc::from(s))
    }
}

impl From<String> for Text {
    fn from(s: String) -> Self {
        Text::Str(Arc::from(s))
    }
}

impl From<&String> for Text {
    fn from(s: &String) -> Self {
        Text::Str(Arc::from(s.as_str()))
    }
}

impl From<&[u8]> for Text {
    fn from(b: &[u8]) -> Self {
        Text::Bytes(Arc::from(b))
    }
}

impl<const N: usize> From<&[u8; N]> for Text {
    fn from(b: &[u8; N]) -> Self {
        Text::Bytes(Arc::from(&b[..]))
    }
}

impl From<Vec<u8>> for Text {
    fn from(b: Vec<u8>) -> Self {
        Text::Bytes(Arc::from(b))
    }
}

// ============================================================================
// LINE TABLE
// ============================================================================

/// Maps byte offsets to 1-based lines and columns.
pub struct LineTable {
    starts: Vec<usize>,
    binary: bool,
}

impl LineTable {
    pub fn new(text: &Text) -> Self {
        let bytes = text.as_bytes();
        let mut starts = vec![0];
        starts.extend(
            bytes
                .iter()
                .enumerate()
                .filter(|(_, b)| **b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            starts,
            binary: text.is_binary(),
        }
    }

    pub fn position(&self, text: &Text, index: usize) -> Position {
        let index = index.min(text.len());
        let line = self.starts.partition_point(|start| *start <= index);
        let line_start = self.starts[line - 1];
        let column = if self.binary {
            index - line_start + 1
        } else {
            count_chars(&text.as_bytes()[line_start..index]) + 1
        };
        Position::new(index, line, column)
    }

    fn line_bounds(&self, text: &Text, line: usize) -> (usize, usize) {
        let start = self.starts[line - 1];
        let end = self
            .starts
            .get(line)
            .map(|next| next - 1)
            .unwrap_or_else(|| text.len());
        (start, end)
    }
}

/// Counts UTF-8 scalar values without requiring a char boundary.
fn count_chars(bytes: &[u8]) -> usize {
    bytes.iter().filter(|b| (**b & 0xC0) != 0x80).count()
}

// ============================================================================
// EXCERPTS
// ============================================================================

const ELLIPSIS: &str = "...";

/// Renders the input around `position` with a caret under it.
///
/// Text input shows the current line, trimmed with ellipses when it is wider
/// than `width`. Binary input shows the bytes around the position.
pub fn excerpt(text: &Text, table: &LineTable, position: &Position, width: usize) -> String {
    match text {
        Text::Bytes(bytes) => binary_excerpt(bytes, position.index),
        Text::Str(s) => {
            let (start, end) = table.line_bounds(text, position.line);
            let line = s.get(start..end).unwrap_or("").trim_end_matches('\r');
            let split = (position.index - start).min(line.len());
            let split = floor_char_boundary(line, split);
            let (before, after) = line.split_at(split);
            let (before, after) = trim_line(before, after, width);
            let caret_offset = UnicodeWidthStr::width(before.as_str());
            format!("{before}{after}\n{}^", " ".repeat(caret_offset))
        }
    }
}

fn trim_line(before: &str, after: &str, width: usize) -> (String, String) {
    let total = before.chars().count() + after.chars().count();
    if total <= width {
        return (before.to_string(), after.to_string());
    }
    let half = width.saturating_sub(2 * ELLIPSIS.len()) / 2;
    let before_len = before.chars().count();
    let after_len = after.chars().count();

    let before = if before_len > half {
        let kept: String = before.chars().skip(before_len - half).collect();
        format!("{ELLIPSIS}{kept}")
    } else {
        before.to_string()
    };
    let after = if after_len > half {
        let kept: String = after.chars().take(half).collect();
        format!("{kept}{ELLIPSIS}")
    } else {
        after.to_string()
    };
    (before, after)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn binary_excerpt(bytes: &[u8], index: usize) -> String {
    let start = index.saturating_sub(1).min(bytes.len());
    let end = (index + 2).min(bytes.len());
    let shown = repr_bytes(&bytes[start..end]);
    // `b'` plus the escaped bytes that precede the position.
    let lead = repr_bytes(&bytes[start..index.min(end)]);
    let caret_offset = lead.len().saturating_sub(1);
    format!("{shown}\n{}^", " ".repeat(caret_offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_are_one_based() {
        let text = Text::from("ab\ncd\n");
        let table = LineTable::new(&text);
        assert_eq!(table.position(&text, 0), Position::new(0, 1, 1));
        assert_eq!(table.position(&text, 4), Position::new(4, 2, 2));
        assert_eq!(table.position(&text, 6), Position::new(6, 3, 1));
    }

    #[test]
    fn test_columns_count_chars() {
        let text = Text::from("héllo");
        let table = LineTable::new(&text);
        // 'é' is two bytes.
        assert_eq!(table.position(&text, 3).column, 3);
    }

    #[test]
    fn test_short_line_excerpt() {
        let text = Text::from("first\nfoobaz\n");
        let table = LineTable::new(&text);
        let pos = table.position(&text, 9);
        assert_eq!(excerpt(&text, &table, &pos, 96), "foobaz\n   ^");
    }

    #[test]
    fn test_long_line_is_trimmed() {
        let line = "x".repeat(200);
        let text = Text::from(line.as_str());
        let table = LineTable::new(&text);
        let pos = table.position(&text, 100);
        let rendered = excerpt(&text, &table, &pos, 96);
        let mut lines = rendered.lines();
        let shown = lines.next().unwrap();
        let caret = lines.next().unwrap();
        assert!(shown.starts_with("...") && shown.ends_with("..."));
        assert!(shown.len() <= 96);
        assert_eq!(caret.len() - 1, 3 + 45);
    }

    #[test]
    fn test_binary_excerpt() {
        let text = Text::from(&b"abcdef"[..]);
        let table = LineTable::new(&text);
        let pos = table.position(&text, 2);
        assert_eq!(excerpt(&text, &table, &pos, 96), "b'bcd'\n   ^");
    }
}
