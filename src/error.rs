//! Error taxonomy for the alignment pipeline.
//!
//! Annotation never fails: malformed inputs degrade feature by feature with
//! a logged warning while the rest of the result stays usable. Alignment is
//! the one fallible entry point, because a performance that cannot be
//! classified against the score has no meaningful partial result.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The document produced no chord positions to align against.
    #[error("score has no chord positions")]
    EmptyScore,

    /// The performance carries no note events.
    #[error("performance has no note events")]
    EmptyPerformance,

    /// The performed onset count matches neither expected rendition.
    #[error(
        "performance has {found} distinct onsets, expected {minimal} (single pass) or {complete} (full playthrough)"
    )]
    CountMismatch {
        found: usize,
        minimal: usize,
        complete: usize,
    },

    /// A JSON export of an engine table failed to serialize.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
