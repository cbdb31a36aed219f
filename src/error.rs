use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the storage layer.
///
/// Out-of-bounds variants indicate a caller bug: they are never clamped or
/// retried, and carry the offending argument together with the length it was
/// checked against so that tests can assert the exact failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("index {index} out of bounds for text of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("position {position} out of bounds for text of length {len}")]
    PositionOutOfBounds { position: usize, len: usize },

    #[error("range {start}..{end} out of bounds for text of length {len}")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },

    #[error("destination of length {dest_len} too small for {count} characters")]
    DestinationTooSmall { count: usize, dest_len: usize },

    #[error("line {line} out of bounds for text with {line_breaks} line breaks")]
    LineOutOfBounds { line: usize, line_breaks: usize },

    #[error("invalid NUL character at offset {offset}")]
    InvalidCharacter { offset: usize },
}
