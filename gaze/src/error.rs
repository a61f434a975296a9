//! Error taxonomy for the gaze subsystem.
//!
//! Only `AdapterInit` and `FaceNotDetected` are session-fatal and reach the
//! user.  Scoring and activation failures are absorbed by the component that
//! hits them.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GazeError {
    /// Camera, permission or estimator start-up failure.
    #[error("gaze estimator failed to start: {0}")]
    AdapterInit(String),

    /// No valid estimate arrived within the face-detection window.
    #[error("no face detected within {waited_ms} ms")]
    FaceNotDetected { waited_ms: u64 },

    /// The estimator threw while a calibration point was being scored.
    #[error("estimator failed while scoring point {index}: {reason}")]
    PointScoring { index: usize, reason: String },

    /// The element under gaze vanished between hit-test and activation.
    #[error("activation target {0} is gone")]
    TargetGone(u64),

    #[error("dwell time {0} ms is outside 500..=3000 ms")]
    DwellTimeOutOfRange(u64),

    #[error("calibration point {got} is not the active point (expected {expected:?})")]
    InvalidPointIndex { got: usize, expected: Option<usize> },

    #[error("no calibration in progress")]
    NotCalibrating,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("event loop error: {0}")]
    EventLoop(String),
}

impl GazeError {
    /// Whether this error ends the calibration session and must be shown
    /// to the user with a retry action.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::AdapterInit(_) | Self::FaceNotDetected { .. })
    }
}

pub type Result<T, E = GazeError> = std::result::Result<T, E>;
