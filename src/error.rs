//! Error taxonomy for the link and the adaptive engine.

use thiserror::Error;

use crate::session::Ready;

/// Every condition the link reports.
///
/// Most variants are recoverable: the frame or update that raised them is
/// dropped and the session stays usable.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Declared payload does not fit the receive buffer.
    #[error("payload of {declared} bytes exceeds buffer capacity {capacity}")]
    CapacityExceeded { declared: usize, capacity: usize },

    /// Number of parsed values does not match what the tag requires.
    #[error("{tag}: expected {expected} values, parsed {parsed}")]
    ParseCountMismatch {
        tag: &'static str,
        expected: usize,
        parsed: usize,
    },

    /// Byte-stream frame not closed by `<EOF>`; the frame was dropped.
    #[error("{tag}: frame trailer missing")]
    MissingTrailer { tag: String },

    /// Frame carried a tag nobody handles.
    #[error("unrecognized frame tag {0:?}")]
    UnrecognizedTag(String),

    /// `run` was invoked before the listed items were installed.
    #[error("missing prerequisite(s): {0:?}")]
    MissingPrerequisite(Ready),

    /// RLS denominator collapsed; the update was skipped.
    #[error("numerical instability: RLS denominator {denominator}")]
    NumericalInstability { denominator: f32 },

    /// Queued input samples would exceed the configured bound.
    #[error("pending input overflow: {queued} samples queued, capacity {capacity}")]
    PendingOverflow { queued: usize, capacity: usize },

    /// Transport read timed out with a partial frame buffered.
    #[error("read timed out with {buffered} bytes of a partial frame")]
    Timeout { buffered: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LinkError {
    /// True when the session can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            LinkError::Io(_) | LinkError::Json(_) | LinkError::InvalidConfig(_)
        )
    }
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;
