//! Error types for tessera

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A structural invariant of a posting stream or merge input was broken:
    /// document IDs out of order, a zero-frequency document, a position or
    /// payload outside the codec's bounds, truncated chunk bytes.
    #[error("index corruption: {0}")]
    Corruption(String),

    #[error("codec mismatch: expected {expected}, got {got}")]
    CodecMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("query error: {0}")]
    Query(String),
}

pub type Result<T> = std::result::Result<T, Error>;
