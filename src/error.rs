//! Error types for frame processing and session setup.

use thiserror::Error;

/// A single frame was rejected. The session that produced it is left untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("frame {frame_index}: landmark `{landmark}` has non-finite coordinates")]
    NonFiniteCoordinate { frame_index: u64, landmark: String },

    #[error("frame {frame_index}: landmark `{landmark}` confidence {confidence} is outside [0, 1]")]
    ConfidenceOutOfRange {
        frame_index: u64,
        landmark: String,
        confidence: f32,
    },

    #[error("frame {frame_index}: timestamp is not finite")]
    InvalidTimestamp { frame_index: u64 },

    #[error("frame index {got} does not follow previous frame {previous}")]
    OutOfOrder { previous: u64, got: u64 },
}

/// Rejected session or test configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid pose config: {0}")]
    InvalidPose(String),

    #[error("invalid filter config: {0}")]
    InvalidFilter(String),

    #[error("invalid tracker config: {0}")]
    InvalidTracker(String),

    #[error("invalid ROM config: {0}")]
    InvalidRom(String),

    #[error("unknown test type `{0}`")]
    UnknownTestType(String),
}

/// A payload that arrived intact but does not decode as the expected message.
#[derive(Debug, Error)]
#[error("malformed message: {source}")]
pub struct MalformedMessage {
    /// Recovered when the payload is a JSON object with a numeric `frame_index`
    pub frame_index: Option<u64>,
    #[source]
    pub source: serde_json::Error,
}
