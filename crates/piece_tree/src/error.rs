use thiserror::Error;

/// An offset, range, line or column outside the document's bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OutOfRange {
    #[error("offset {offset} exceeds buffer length {len}")]
    Offset { offset: usize, len: usize },

    #[error("range of {count} bytes at offset {offset} exceeds buffer length {len}")]
    Range {
        offset: usize,
        count: usize,
        len: usize,
    },

    #[error("line {line} exceeds line count {line_count}")]
    Line { line: usize, line_count: usize },

    #[error("column {column} exceeds the length of line {line}")]
    Column { line: usize, column: usize },
}
