// src/error.rs
//
// Error taxonomy for the analysis engine.
//
// Per-frame failures (InvalidFrame, DegenerateDetection, DetectorFailure)
// are absorbed by the orchestrator and logged — they never abort a video.
// DecodeError and Cancelled are terminal for the current video: no partial
// RoadReport is produced.

use thiserror::Error;

pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Degenerate frame (zero dimensions or truncated pixel buffer).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Detection with a zero-area bounding box. Dropped before tracking.
    #[error("degenerate detection: {0}")]
    DegenerateDetection(String),

    /// The detector collaborator failed for one frame. Treated as an empty
    /// detection list by the orchestrator.
    #[error("detector failure: {0}")]
    DetectorFailure(#[source] anyhow::Error),

    /// The video could not be opened, or a read failed mid-stream.
    #[error("decode error for '{video}' (last processed frame {last_frame}): {message}")]
    DecodeError {
        video: String,
        last_frame: i64,
        message: String,
    },

    /// External cancellation between frames. The run is discarded.
    #[error("analysis cancelled after frame {last_frame}")]
    Cancelled { last_frame: i64 },
}
